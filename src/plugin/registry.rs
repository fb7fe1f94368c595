//! 插件注册表（写时复制）
//! 注册/清空替换整个快照，进行中的扫描继续使用旧快照
use rustc_hash::FxHashSet;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use super::{PluginFailure, RulePlugin};
use crate::result::ScanResult;

type PluginList = Arc<Vec<Arc<dyn RulePlugin>>>;

/// 一次插件扫描的产出
#[derive(Debug, Default)]
pub struct PluginScan {
    /// 全部命中插件折叠成的结果，无命中为 None
    pub result: Option<ScanResult>,
    pub failures: Vec<PluginFailure>,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<PluginList>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.snapshot().iter().map(|p| p.qualified_name()).collect();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前插件快照
    pub fn snapshot(&self) -> PluginList {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, next: Vec<Arc<dyn RulePlugin>>) {
        *self.plugins.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// 追加单个插件
    pub fn register(&self, plugin: Arc<dyn RulePlugin>) {
        let mut guard = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        let name = plugin.qualified_name();
        if guard.iter().any(|p| p.qualified_name() == name) {
            log::warn!("Duplicate plugin registered | Plugin: {}", name);
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(plugin);
        *guard = Arc::new(next);
        log::debug!("Plugin registered | Plugin: {} | Total: {}", name, guard.len());
    }

    /// 整体替换插件集合
    pub fn register_all(&self, plugins: Vec<Arc<dyn RulePlugin>>) {
        let mut seen = FxHashSet::default();
        for plugin in &plugins {
            let name = plugin.qualified_name();
            if !seen.insert(name.clone()) {
                log::warn!("Duplicate plugin registered | Plugin: {}", name);
            }
        }
        let total = plugins.len();
        self.replace(plugins);
        log::debug!("Plugin set replaced | Total: {}", total);
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
        log::debug!("Plugin set cleared");
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// 按注册顺序执行全部插件
    /// 单个插件的错误或 panic 被隔离为 PluginFailure，不影响其他插件
    pub fn scan_all(&self, data: &[u8]) -> PluginScan {
        let plugins = self.snapshot();
        let mut scan = PluginScan::default();
        let mut matched = Vec::new();

        for plugin in plugins.iter() {
            match catch_unwind(AssertUnwindSafe(|| plugin.scan(data))) {
                Ok(Ok(Some(rule))) => matched.push(rule),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => scan.failures.push(PluginFailure {
                    plugin: plugin.qualified_name(),
                    message: e.to_string(),
                    panicked: false,
                    channel: None,
                }),
                Err(payload) => scan.failures.push(PluginFailure {
                    plugin: plugin.qualified_name(),
                    message: panic_message(payload.as_ref()),
                    panicked: true,
                    channel: None,
                }),
            }
        }

        scan.result = ScanResult::from_rules(matched).into_non_empty();
        scan
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}
