//! 基于字节正则的插件
use regex::bytes::Regex;

use super::{PluginError, RuleDefinition, RulePlugin};
use crate::error::{RsyResult, RsyaraError};
use crate::result::{MatchingRule, Metadata, Pattern, PatternMatch};

/// 单个模式最多记录的命中数
const MAX_MATCHES_PER_PATTERN: usize = 1_000;

#[derive(Debug, Clone)]
pub struct RegexPlugin {
    definition: RuleDefinition,
    regexes: Vec<Regex>,
}

impl RegexPlugin {
    /// 编译描述中的全部模式，至少需要一个模式
    pub fn from_definition(definition: RuleDefinition) -> RsyResult<Self> {
        if definition.identifier.is_empty() {
            return Err(RsyaraError::InvalidInput("插件标识不能为空".to_string()));
        }
        if definition.patterns.is_empty() {
            return Err(RsyaraError::InvalidInput(format!(
                "插件 {} 未定义任何模式",
                definition.identifier
            )));
        }
        let regexes = definition
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { definition, regexes })
    }

    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }
}

impl RulePlugin for RegexPlugin {
    fn identifier(&self) -> &str {
        &self.definition.identifier
    }

    fn namespace(&self) -> &str {
        &self.definition.namespace
    }

    fn metadata(&self) -> &[Metadata] {
        &self.definition.metadata
    }

    fn scan(&self, data: &[u8]) -> Result<Option<MatchingRule>, PluginError> {
        let mut patterns = Vec::new();
        for (idx, regex) in self.regexes.iter().enumerate() {
            let matches: Vec<PatternMatch> = regex
                .find_iter(data)
                .take(MAX_MATCHES_PER_PATTERN)
                .map(|m| PatternMatch {
                    offset: m.start(),
                    length: m.len(),
                    xor_key: false,
                })
                .collect();
            if matches.is_empty() {
                if self.definition.match_all {
                    return Ok(None);
                }
                continue;
            }
            patterns.push(Pattern {
                identifier: format!("${}", idx),
                matches,
            });
        }
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut rule = self.definition.to_matching_rule();
        rule.patterns = patterns;
        Ok(Some(rule))
    }
}
