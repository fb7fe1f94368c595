//! 多通道扫描编排
//! 单次调用：开启节流批次 → 依次处理 content / comment / meta 通道
//! （每个通道：节流点 → 原生引擎 → 插件）→ 关闭批次
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::backend::GlobalValue;
use crate::cache::RuleCacheManager;
use crate::compiler::{CompilerSession, SessionStatus};
use crate::config::{PluginFailurePolicy, ScanConfig};
use crate::error::{RsyResult, RsyaraError};
use crate::pacing::{self, PacingBatch, PacingStrategy};
use crate::plugin::{PluginFailure, PluginRegistry, PluginScan, RulePlugin};
use crate::result::{ChannelWeights, MatchChannel, ScanResult, WeightedResult};

/// 详细扫描结果：加权结果 + 被跳过的插件失败
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanOutcome {
    pub results: Vec<WeightedResult>,
    pub plugin_failures: Vec<PluginFailure>,
}

/// 扫描编排器
/// 编译会话（含绑定的扫描端）由互斥锁串行化，插件注册表可并发读写
pub struct Scanner {
    session: Mutex<CompilerSession>,
    plugins: PluginRegistry,
    pacing: Arc<dyn PacingStrategy>,
    weights: ChannelWeights,
    plugin_failure: PluginFailurePolicy,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("status", &self.status())
            .field("plugins", &self.plugins)
            .field("pacing", &self.pacing.name())
            .field("weights", &self.weights)
            .field("plugin_failure", &self.plugin_failure)
            .finish()
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// 默认配置
    pub fn new() -> Self {
        Self::with_config(&ScanConfig::default())
    }

    pub fn with_config(config: &ScanConfig) -> Self {
        Self::with_session(CompilerSession::new(config), config)
    }

    /// 使用已有会话（如从缓存恢复的会话）
    pub fn with_session(session: CompilerSession, config: &ScanConfig) -> Self {
        Self {
            session: Mutex::new(session),
            plugins: PluginRegistry::new(),
            pacing: pacing::from_config(&config.pacing),
            weights: config.weights,
            plugin_failure: config.plugin_failure,
        }
    }

    /// 从规则缓存恢复
    pub fn from_cache(path: impl AsRef<Path>, config: &ScanConfig) -> RsyResult<Self> {
        Ok(Self::with_session(CompilerSession::from_cache(path, config)?, config))
    }

    /// 替换节流策略
    pub fn with_pacing(mut self, pacing: Arc<dyn PacingStrategy>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn set_pacing(&mut self, pacing: Arc<dyn PacingStrategy>) {
        self.pacing = pacing;
    }

    pub fn pacing(&self) -> &Arc<dyn PacingStrategy> {
        &self.pacing
    }

    pub fn weights(&self) -> ChannelWeights {
        self.weights
    }

    fn session(&self) -> MutexGuard<'_, CompilerSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== 编译会话 =====

    pub fn status(&self) -> SessionStatus {
        self.session().status()
    }

    pub fn add_namespace(&self, name: &str) -> RsyResult<()> {
        self.session().add_namespace(name)
    }

    pub fn add_source(&self, source: &str) -> RsyResult<()> {
        self.session().add_source(source)
    }

    /// 支持 `;` 分隔的多个路径
    pub fn add_file(&self, paths: &str) -> RsyResult<()> {
        self.session().add_file(paths)
    }

    /// 每个规则文件使用以其路径命名的命名空间
    pub fn add_file_with_namespace(&self, paths: &str) -> RsyResult<()> {
        self.session().add_file_with_namespace(paths)
    }

    pub fn add_paths(&self, paths: &[PathBuf], path_as_namespace: bool) -> RsyResult<usize> {
        self.session().add_paths(paths, path_as_namespace)
    }

    pub fn ignore_module(&self, module: &str) -> RsyResult<()> {
        self.session().ignore_module(module)
    }

    pub fn define_global(&self, ident: &str, value: GlobalValue) -> RsyResult<()> {
        self.session().define_global(ident, value)
    }

    pub fn build(&self) -> RsyResult<()> {
        self.session().build()
    }

    /// 释放编译会话，重复调用为空操作
    pub fn close(&self) -> bool {
        self.session().close()
    }

    /// 导出已构建规则集的序列化字节
    pub fn export_rules(&self) -> RsyResult<Vec<u8>> {
        self.session().export()
    }

    /// 保存规则缓存
    pub fn save_cache(&self, path: impl AsRef<Path>) -> RsyResult<()> {
        let serialized = self.export_rules()?;
        RuleCacheManager::save_to_cache(path.as_ref(), &serialized)
    }

    // ===== 插件 =====

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn register(&self, plugin: Arc<dyn RulePlugin>) {
        self.plugins.register(plugin);
    }

    pub fn register_all(&self, plugins: Vec<Arc<dyn RulePlugin>>) {
        self.plugins.register_all(plugins);
    }

    pub fn clear_plugins(&self) {
        self.plugins.clear();
    }

    // ===== 扫描 =====

    /// 仅原生引擎扫描，会话尚未构建时返回 None
    pub fn scan_native(&self, data: &[u8]) -> RsyResult<Option<ScanResult>> {
        self.session().scan_if_built(data)
    }

    /// 仅插件扫描（失败已隔离）
    pub fn scan_plugins(&self, data: &[u8]) -> PluginScan {
        self.plugins.scan_all(data)
    }

    /// 多通道扫描，返回按 [content, comment, meta] × [原生, 插件] 排列的加权结果
    pub fn scan(
        &self,
        content: Option<&[u8]>,
        comments: Option<&[u8]>,
        meta: Option<&[u8]>,
    ) -> RsyResult<Vec<WeightedResult>> {
        Ok(self.scan_detailed(content, comments, meta)?.results)
    }

    /// 多通道扫描，同时返回被跳过的插件失败
    pub fn scan_detailed(
        &self,
        content: Option<&[u8]>,
        comments: Option<&[u8]>,
        meta: Option<&[u8]>,
    ) -> RsyResult<ScanOutcome> {
        let batch = PacingBatch::begin(self.pacing.as_ref());
        let mut outcome = ScanOutcome::default();

        let channels = [
            (MatchChannel::Content, content),
            (MatchChannel::Comment, comments),
            (MatchChannel::Meta, meta),
        ];
        for (channel, data) in channels {
            let Some(data) = data else {
                continue;
            };
            batch.step();
            let weight = self.weights.weight(channel);

            // 原生引擎失败直接返回，批次由守卫关闭
            let native = self.scan_native(data)?;
            let native_hits = native.as_ref().map_or(0, |r| r.matching_rules.len());
            if let Some(result) = native {
                outcome.results.push(WeightedResult::new(channel, weight, result));
            }

            let plugin_scan = self.plugins.scan_all(data);
            for mut failure in plugin_scan.failures {
                failure.channel = Some(channel);
                match self.plugin_failure {
                    PluginFailurePolicy::Skip => {
                        log::warn!(
                            "Plugin scan failed, skipped | Plugin: {} | Channel: {} | Panicked: {} | Error: {}",
                            failure.plugin,
                            channel,
                            failure.panicked,
                            failure.message
                        );
                        outcome.plugin_failures.push(failure);
                    }
                    PluginFailurePolicy::Abort => {
                        log::error!(
                            "Plugin scan failed, aborting | Plugin: {} | Channel: {} | Error: {}",
                            failure.plugin,
                            channel,
                            failure.message
                        );
                        return Err(RsyaraError::Plugin {
                            plugin: failure.plugin,
                            message: failure.message,
                        });
                    }
                }
            }
            let plugin_hits = plugin_scan.result.as_ref().map_or(0, |r| r.matching_rules.len());
            if let Some(result) = plugin_scan.result {
                outcome.results.push(WeightedResult::new(channel, weight, result));
            }

            log::debug!(
                "Channel scanned | Channel: {} | Bytes: {} | Native hits: {} | Plugin hits: {} | Batch: {}",
                channel,
                data.len(),
                native_hits,
                plugin_hits,
                batch.token()
            );
        }

        batch.finish();
        Ok(outcome)
    }

    /// 批量扫描多个缓冲（仅原生引擎），共用一个节流批次
    pub fn scan_batch(&self, buffers: &[&[u8]]) -> RsyResult<Vec<Option<ScanResult>>> {
        let batch = PacingBatch::begin(self.pacing.as_ref());
        let mut results = Vec::with_capacity(buffers.len());
        for data in buffers {
            batch.step();
            results.push(self.scan_native(data)?);
        }
        batch.finish();
        Ok(results)
    }
}
