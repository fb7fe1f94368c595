//! 闭包插件
use std::fmt;

use super::{PluginError, RuleDefinition, RulePlugin};
use crate::result::{MatchingRule, Metadata, Pattern};

type ScanFn = dyn Fn(&[u8]) -> Result<Option<Vec<Pattern>>, PluginError> + Send + Sync;

/// 由闭包实现检测逻辑，描述提供标识与元数据
/// 闭包返回 Some(patterns) 表示命中
pub struct FnPlugin {
    definition: RuleDefinition,
    scan_fn: Box<ScanFn>,
}

impl fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl FnPlugin {
    pub fn new<F>(definition: RuleDefinition, scan_fn: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Option<Vec<Pattern>>, PluginError> + Send + Sync + 'static,
    {
        Self {
            definition,
            scan_fn: Box::new(scan_fn),
        }
    }

    /// 布尔判定插件，命中时不携带模式
    pub fn predicate<F>(definition: RuleDefinition, predicate: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        Self::new(definition, move |data| Ok(predicate(data).then(Vec::new)))
    }
}

impl RulePlugin for FnPlugin {
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
        Ok((self.scan_fn)(data)?.map(|patterns| {
            let mut rule = self.definition.to_matching_rule();
            rule.patterns = patterns;
            rule
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::PatternMatch;

    #[test]
    fn test_predicate_plugin() {
        let plugin = FnPlugin::predicate(RuleDefinition::new("always", "test"), |_| true);
        let rule = plugin.scan(b"x").unwrap().unwrap();
        assert_eq!(rule.qualified_name(), "test:always");
        assert!(rule.patterns.is_empty());
        assert_eq!(plugin.qualified_name(), "test:always");
    }

    #[test]
    fn test_closure_patterns_and_errors() {
        // 测试场景：闭包返回模式 / 返回错误
        let plugin = FnPlugin::new(RuleDefinition::new("mz", "pe"), |data| {
            if data.is_empty() {
                return Err("empty buffer".into());
            }
            Ok(data.starts_with(b"MZ").then(|| {
                vec![Pattern {
                    identifier: "$mz".into(),
                    matches: vec![PatternMatch { offset: 0, length: 2, xor_key: false }],
                }]
            }))
        });
        assert_eq!(plugin.scan(b"MZ\x90").unwrap().unwrap().patterns[0].identifier, "$mz");
        assert!(plugin.scan(b"ELF").unwrap().is_none());
        assert_eq!(plugin.scan(b"").unwrap_err(), PluginError::from("empty buffer"));
    }
}
