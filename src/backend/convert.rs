//! yara-x 扫描结果 → 统一结果结构
use std::collections::BTreeMap;

use crate::result::{MatchingRule, Metadata, Pattern, PatternMatch, ScanResult};

pub(crate) fn scan_result(results: &yara_x::ScanResults) -> ScanResult {
    let matching_rules = results.matching_rules().map(|rule| matching_rule(&rule)).collect();

    // 模块输出统一转为 JSON 字符串
    let mut module_outputs = BTreeMap::new();
    for (module, output) in results.module_outputs() {
        match protobuf_json_mapping::print_to_string(output) {
            Ok(json) => {
                module_outputs.insert(module.to_string(), json);
            }
            Err(_) => log::warn!("Module output skipped, not printable as JSON | Module: {}", module),
        }
    }

    ScanResult {
        matching_rules,
        module_outputs,
    }
}

fn matching_rule(rule: &yara_x::Rule) -> MatchingRule {
    MatchingRule {
        identifier: rule.identifier().to_string(),
        namespace: rule.namespace().to_string(),
        metadata: rule
            .metadata()
            .map(|(key, value)| Metadata::new(key, meta_value(value)))
            .collect(),
        patterns: rule
            .patterns()
            .map(|pattern| Pattern {
                identifier: pattern.identifier().to_string(),
                matches: pattern
                    .matches()
                    .map(|m| {
                        let range = m.range();
                        PatternMatch {
                            offset: range.start,
                            length: range.len(),
                            xor_key: m.xor_key().is_some(),
                        }
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn meta_value(value: yara_x::MetaValue) -> String {
    match value {
        yara_x::MetaValue::Integer(v) => v.to_string(),
        yara_x::MetaValue::Float(v) => v.to_string(),
        yara_x::MetaValue::Bool(v) => v.to_string(),
        yara_x::MetaValue::String(v) => v.to_string(),
        yara_x::MetaValue::Bytes(v) => v.to_string(),
    }
}
