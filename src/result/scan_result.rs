//! 统一扫描结果结构
//! 原生规则引擎与进程内插件共用同一结果形状
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RsyResult;
use crate::result::channel::MatchChannel;

/// 规则元数据（语义由调用方定义）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(alias = "ident")]
    pub key: String,
    pub value: String,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 单次命中位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub offset: usize,
    pub length: usize,
    /// 是否经变换（如 xor 解码）得到，而非字面命中
    #[serde(default)]
    pub xor_key: bool,
}

/// 命名子模式及其命中列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub identifier: String,
    #[serde(default)]
    pub matches: Vec<PatternMatch>,
}

/// 命中的规则，identifier + namespace 在一次构建内唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
    pub identifier: String,
    pub namespace: String,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

impl MatchingRule {
    pub fn new(identifier: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            namespace: namespace.into(),
            metadata: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// 按键查找元数据（首个）
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    /// namespace:identifier
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }
}

/// 单次扫描单个缓冲的结果
/// 空结果以“无结果”（None）表示，不向合并输出中写入空容器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
    /// 模块名 → 模块输出（对本层不透明）
    #[serde(default)]
    pub module_outputs: BTreeMap<String, String>,
}

impl ScanResult {
    pub fn from_rules(matching_rules: Vec<MatchingRule>) -> Self {
        Self {
            matching_rules,
            module_outputs: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matching_rules.is_empty() && self.module_outputs.is_empty()
    }

    /// 空结果转换为 None
    #[inline]
    pub fn into_non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// 追加合并：规则序列拼接，模块输出右侧覆盖
    pub fn merge(mut self, other: ScanResult) -> ScanResult {
        self.merge_from(other);
        self
    }

    /// 原地追加合并
    pub fn merge_from(&mut self, other: ScanResult) {
        self.matching_rules.extend(other.matching_rules);
        self.module_outputs.extend(other.module_outputs);
    }

    /// 解析引擎输出的 JSON 文档
    pub fn from_json(json: &str) -> RsyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> RsyResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ScanResult: {} matching rule(s)", self.matching_rules.len())?;
        for rule in &self.matching_rules {
            writeln!(f, "  {}", rule)?;
        }
        for (module, output) in &self.module_outputs {
            writeln!(f, "  module {}: {}", module, output)?;
        }
        Ok(())
    }
}

impl fmt::Display for MatchingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())?;
        if !self.metadata.is_empty() {
            let meta: Vec<String> = self
                .metadata
                .iter()
                .map(|m| format!("{}={}", m.key, m.value))
                .collect();
            write!(f, " [{}]", meta.join(", "))?;
        }
        for pattern in &self.patterns {
            let offsets: Vec<String> = pattern
                .matches
                .iter()
                .map(|m| {
                    if m.xor_key {
                        format!("0x{:x}+{}(xor)", m.offset, m.length)
                    } else {
                        format!("0x{:x}+{}", m.offset, m.length)
                    }
                })
                .collect();
            write!(f, " {}@[{}]", pattern.identifier, offsets.join(","))?;
        }
        Ok(())
    }
}

/// 带通道与权重的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedResult {
    pub channel: MatchChannel,
    pub weight: u32,
    pub result: ScanResult,
}

impl WeightedResult {
    pub fn new(channel: MatchChannel, weight: u32, result: ScanResult) -> Self {
        Self { channel, weight, result }
    }
}

impl fmt::Display for WeightedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} w={}] {}", self.channel, self.weight, self.result)
    }
}
