//! 扫描节流策略
//! 三段式协议：begin 开启批次 → 每个通道扫描前 step → finish 关闭批次
pub mod fixed_delay;
pub mod unthrottled;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PacingConfig;

pub use fixed_delay::FixedDelay;
pub use unthrottled::Unthrottled;

/// 批次令牌（仅用于诊断，单次编排调用内有效）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchToken(u64);

impl BatchToken {
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 节流策略
/// begin 需支持多个编排调用并发进入；step 是唯一允许阻塞调用线程的操作
pub trait PacingStrategy: Send + Sync {
    fn begin(&self) -> BatchToken;

    fn step(&self, batch: BatchToken);

    fn finish(&self, batch: BatchToken);

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// 批次守卫：创建时 begin，离开作用域时 finish（包括错误提前返回）
pub struct PacingBatch<'a> {
    strategy: &'a dyn PacingStrategy,
    token: BatchToken,
}

impl<'a> PacingBatch<'a> {
    pub fn begin(strategy: &'a dyn PacingStrategy) -> Self {
        let token = strategy.begin();
        log::debug!("Pacing batch begin | Strategy: {} | Batch: {}", strategy.name(), token);
        Self { strategy, token }
    }

    #[inline]
    pub fn token(&self) -> BatchToken {
        self.token
    }

    /// 通道扫描前的节流点
    #[inline]
    pub fn step(&self) {
        self.strategy.step(self.token);
    }

    /// 显式关闭批次
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for PacingBatch<'_> {
    fn drop(&mut self) {
        self.strategy.finish(self.token);
        log::debug!("Pacing batch finish | Strategy: {} | Batch: {}", self.strategy.name(), self.token);
    }
}

/// 按配置创建节流策略，延迟为 0 时退化为不限速
pub fn from_config(config: &PacingConfig) -> Arc<dyn PacingStrategy> {
    match *config {
        PacingConfig::FixedDelay { delay_ms } if delay_ms > 0 => {
            Arc::new(FixedDelay::new(Duration::from_millis(delay_ms)))
        }
        _ => Arc::new(Unthrottled::new()),
    }
}
