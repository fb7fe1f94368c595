//! 扫描配置管理，存储所有可配置项
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RsyResult, RsyaraError};
use crate::result::ChannelWeights;

/// yara-x 编译器选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// 宽松正则语法：未知转义按字面字符处理
    pub relaxed_re_syntax: bool,
    /// 慢模式报错而非告警
    pub error_on_slow_pattern: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            relaxed_re_syntax: true,
            error_on_slow_pattern: true,
        }
    }
}

/// 节流策略配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacingConfig {
    /// 不限速
    #[default]
    Unthrottled,
    /// 每个通道扫描前固定等待
    FixedDelay { delay_ms: u64 },
}

/// 插件失败处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginFailurePolicy {
    /// 跳过失败插件并告警，继续其他插件与通道
    #[default]
    Skip,
    /// 失败即终止本次扫描
    Abort,
}

/// 完整扫描配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub weights: ChannelWeights,
    pub compiler: CompilerOptions,
    pub pacing: PacingConfig,
    pub plugin_failure: PluginFailurePolicy,
    /// 单个缓冲扫描超时（毫秒）
    pub scan_timeout_ms: Option<u64>,
    /// 规则缓存目录
    pub cache_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            weights: ChannelWeights::default(),
            compiler: CompilerOptions::default(),
            pacing: PacingConfig::default(),
            plugin_failure: PluginFailurePolicy::default(),
            scan_timeout_ms: None,
            cache_dir: PathBuf::from(".cache/rsyara"),
        }
    }
}

impl ScanConfig {
    #[inline]
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }

    /// 缓存目录下的规则缓存文件
    pub fn cache_file_path(&self) -> PathBuf {
        self.cache_dir.join("rsyara_rules.bin")
    }
}

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取默认配置
    pub fn get_default() -> ScanConfig {
        ScanConfig::default()
    }

    /// 自定义配置
    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }

    /// 从 JSON 文件加载配置，缺失字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> RsyResult<ScanConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RsyaraError::ConfigError(format!("读取 {} 失败: {}", path.display(), e)))?;
        let config: ScanConfig = serde_json::from_str(&content)
            .map_err(|e| RsyaraError::ConfigError(format!("解析 {} 失败: {}", path.display(), e)))?;
        log::debug!(
            "Config loaded | Path: {} | Pacing: {:?} | Plugin failure: {:?}",
            path.display(),
            config.pacing,
            config.plugin_failure
        );
        Ok(config)
    }
}

/// 配置构建器（链式 API）
#[derive(Debug, Clone)]
pub struct CustomConfigBuilder {
    config: ScanConfig,
}

impl Default for CustomConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    pub fn weights(mut self, weights: ChannelWeights) -> Self {
        self.config.weights = weights;
        self
    }

    pub fn compiler_options(mut self, options: CompilerOptions) -> Self {
        self.config.compiler = options;
        self
    }

    pub fn relaxed_re_syntax(mut self, enabled: bool) -> Self {
        self.config.compiler.relaxed_re_syntax = enabled;
        self
    }

    pub fn error_on_slow_pattern(mut self, enabled: bool) -> Self {
        self.config.compiler.error_on_slow_pattern = enabled;
        self
    }

    pub fn pacing(mut self, pacing: PacingConfig) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// 固定延迟节流（0 等同不限速）
    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.config.pacing = if delay.is_zero() {
            PacingConfig::Unthrottled
        } else {
            PacingConfig::FixedDelay {
                delay_ms: delay.as_millis() as u64,
            }
        };
        self
    }

    pub fn plugin_failure(mut self, policy: PluginFailurePolicy) -> Self {
        self.config.plugin_failure = policy;
        self
    }

    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.config.scan_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn cache_dir(mut self, path: PathBuf) -> Self {
        self.config.cache_dir = path;
        self
    }

    pub fn build(self) -> ScanConfig {
        self.config
    }
}
