//! 进程内规则插件
//! 与原生引擎输出同形的检测器：命中时返回一条 MatchingRule
pub mod fn_plugin;
pub mod regex_plugin;
pub mod registry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::{MatchChannel, MatchingRule, Metadata};

pub use fn_plugin::FnPlugin;
pub use regex_plugin::RegexPlugin;
pub use registry::{PluginRegistry, PluginScan};

/// 插件扫描错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PluginError(pub String);

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// 规则插件能力
pub trait RulePlugin: Send + Sync {
    fn identifier(&self) -> &str;

    fn namespace(&self) -> &str;

    fn metadata(&self) -> &[Metadata];

    /// 扫描字节缓冲，未命中返回 Ok(None)
    fn scan(&self, data: &[u8]) -> Result<Option<MatchingRule>, PluginError>;

    fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace(), self.identifier())
    }
}

/// 插件描述
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub identifier: String,
    pub namespace: String,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    /// 字节正则（RegexPlugin 使用）
    #[serde(default)]
    pub patterns: Vec<String>,
    /// true：全部模式命中才算命中；false：任一模式命中即可
    #[serde(default)]
    pub match_all: bool,
}

impl RuleDefinition {
    pub fn new(identifier: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push(Metadata::new(key, value));
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn match_all(mut self, match_all: bool) -> Self {
        self.match_all = match_all;
        self
    }

    /// 命中结果骨架（不含模式）
    pub(crate) fn to_matching_rule(&self) -> MatchingRule {
        MatchingRule {
            identifier: self.identifier.clone(),
            namespace: self.namespace.clone(),
            metadata: self.metadata.clone(),
            patterns: Vec::new(),
        }
    }
}

/// 单个插件失败的诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginFailure {
    /// namespace:identifier
    pub plugin: String,
    pub message: String,
    pub panicked: bool,
    /// 由编排层填写
    pub channel: Option<MatchChannel>,
}
