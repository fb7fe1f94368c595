//! 规则引擎边界
//! 编排层只通过这两个 trait 使用规则引擎：编译（命名空间/规则源/构建）与扫描
mod convert;
pub mod native;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RsyResult, RsyaraError};
use crate::result::ScanResult;

pub use native::{NativeBackend, NativeCompiler};

/// 外部全局变量取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl GlobalValue {
    /// 按 bool → 整数 → 浮点 → 字符串的顺序解析命令行取值
    pub fn parse(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<bool>() {
            GlobalValue::Bool(v)
        } else if let Ok(v) = raw.parse::<i64>() {
            GlobalValue::Integer(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            GlobalValue::Float(v)
        } else {
            GlobalValue::String(raw.to_string())
        }
    }
}

impl fmt::Display for GlobalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalValue::Bool(v) => write!(f, "{}", v),
            GlobalValue::Integer(v) => write!(f, "{}", v),
            GlobalValue::Float(v) => write!(f, "{}", v),
            GlobalValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

/// 规则编译端
pub trait RuleCompilerBackend: Send {
    /// 切换后续规则源的命名空间
    fn add_namespace(&mut self, name: &str) -> RsyResult<()>;

    /// 添加单个规则源文本
    fn add_source(&mut self, source: &str) -> RsyResult<()>;

    /// 添加单个规则文件
    fn add_file(&mut self, path: &Path) -> RsyResult<()>;

    /// 添加文件/目录，path_as_namespace 时每个文件使用独立命名空间
    fn add_paths(&mut self, paths: &[PathBuf], path_as_namespace: bool) -> RsyResult<usize>;

    /// 忽略规则中导入的模块
    fn ignore_module(&mut self, module: &str) -> RsyResult<()> {
        Err(RsyaraError::InvalidInput(format!("当前编译端不支持忽略模块: {}", module)))
    }

    /// 定义规则条件可引用的外部全局变量
    fn define_global(&mut self, ident: &str, value: GlobalValue) -> RsyResult<()> {
        Err(RsyaraError::InvalidInput(format!(
            "当前编译端不支持定义全局变量: {} = {}",
            ident, value
        )))
    }

    /// 一次性构建：冻结规则集并返回绑定的扫描端
    fn build(self: Box<Self>) -> RsyResult<Box<dyn ScanBackend>>;
}

/// 绑定到不可变规则集的扫描端
pub trait ScanBackend: Send {
    /// 扫描字节缓冲，无命中返回 None
    fn scan(&mut self, data: &[u8]) -> RsyResult<Option<ScanResult>>;

    fn rule_count(&self) -> usize;

    /// 序列化规则集（用于规则缓存）
    fn serialize(&self) -> RsyResult<Vec<u8>> {
        Err(RsyaraError::InvalidInput("当前扫描端不支持导出规则集".to_string()))
    }
}
