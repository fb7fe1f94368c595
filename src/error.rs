//! 全局错误类型定义
use thiserror::Error;
use regex::Error as RegexError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;


/// 资源生命周期误用（编程错误，不重试、不吞掉）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("编译会话已构建，不允许重复 build 或继续添加规则")]
    AlreadyBuilt,
    #[error("编译会话尚未构建，无法扫描")]
    NotBuilt,
    #[error("编译会话已关闭")]
    Closed,
    #[error("编译会话构建失败，会话已不可用")]
    BuildFailed,
}

#[derive(Error, Debug)]
pub enum RsyaraError {
    // 规则引擎错误
    #[error("规则编译失败：{0}")]
    Compile(String),
    #[error("规则集构建失败：{0}")]
    Build(String),
    #[error("扫描失败：{0}")]
    Scan(String),

    // 插件错误
    #[error("插件扫描失败 [{plugin}]：{message}")]
    Plugin { plugin: String, message: String },
    #[error("插件正则编译失败：{0}")]
    RegexCompileError(#[from] RegexError),

    // 生命周期错误
    #[error("生命周期错误：{0}")]
    Lifecycle(#[from] LifecycleError),

    // 全局扫描器错误
    #[error("全局扫描器未初始化")]
    ScannerNotInitialized,
    #[error("全局扫描器初始化失败: {0}")]
    ScannerInitError(String),

    // 缓存/配置错误
    #[error("规则缓存失败：{0}")]
    RuleCacheError(String),
    #[error("配置加载失败：{0}")]
    ConfigError(String),

    // 序列化/反序列化错误
    #[error("JSON解析失败：{0}")]
    JsonError(#[from] SerdeJsonError),

    // 基础错误
    #[error("IO操作失败：{0}")]
    IoError(#[from] IoError),
    #[error("无效输入：{0}")]
    InvalidInput(String),

    #[error("异步任务执行失败：{0}")]
    AsyncTaskError(String),
}

impl RsyaraError {
    /// 是否为生命周期误用
    #[inline]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, RsyaraError::Lifecycle(_))
    }
}

// 全局Result类型
pub type RsyResult<T> = Result<T, RsyaraError>;
