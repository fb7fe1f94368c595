//! rsyara - 多通道加权规则扫描编排层
//! 编译会话生命周期、节流策略、进程内规则插件、统一加权结果

pub mod backend;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod pacing;
pub mod plugin;
pub mod result;
pub mod scanner;

// 导出全局错误类型
pub use self::error::{LifecycleError, RsyResult, RsyaraError};

// 导出配置模块核心结构体与构建器
pub use crate::config::{
    CompilerOptions, ConfigManager, CustomConfigBuilder, PacingConfig, PluginFailurePolicy, ScanConfig,
};

// 导出结果模型
pub use crate::result::{
    ChannelWeights, MatchChannel, MatchingRule, Metadata, Pattern, PatternMatch, ScanResult, WeightedResult,
};

// 导出编译会话与引擎边界
pub use crate::backend::{GlobalValue, NativeBackend, NativeCompiler, RuleCompilerBackend, ScanBackend};
pub use crate::compiler::{CompilerSession, SessionStatus};

// 导出节流策略
pub use crate::pacing::{BatchToken, FixedDelay, PacingBatch, PacingStrategy, Unthrottled};

// 导出插件
pub use crate::plugin::{
    FnPlugin, PluginError, PluginFailure, PluginRegistry, PluginScan, RegexPlugin, RuleDefinition, RulePlugin,
};

// 导出编排器与全局单例
pub use crate::scanner::{global_scanner, init_global_scanner, init_global_scanner_with, ScanOutcome, Scanner};

// 导出规则缓存
pub use crate::cache::{RuleCacheManager, CACHE_FORMAT_VERSION};
