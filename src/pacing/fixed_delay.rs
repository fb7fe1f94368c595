//! 固定延迟节流：每个通道扫描前阻塞调用线程 delay
//! 等待可被 interrupt 打断，打断状态保持到 resume
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::{BatchToken, PacingStrategy};

#[derive(Debug)]
pub struct FixedDelay {
    delay: Duration,
    counter: AtomicU64,
    interrupted: Mutex<bool>,
    wakeup: Condvar,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            counter: AtomicU64::new(0),
            interrupted: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(delay_ms))
    }

    #[inline]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 唤醒所有等待中的 step，之后的 step 立即返回
    pub fn interrupt(&self) {
        let mut interrupted = self.interrupted.lock().unwrap_or_else(PoisonError::into_inner);
        *interrupted = true;
        self.wakeup.notify_all();
        log::debug!("Fixed delay pacing interrupted | Delay: {:?}", self.delay);
    }

    /// 恢复节流
    pub fn resume(&self) {
        *self.interrupted.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PacingStrategy for FixedDelay {
    fn begin(&self) -> BatchToken {
        BatchToken::new(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn step(&self, batch: BatchToken) {
        if self.delay.is_zero() {
            return;
        }
        let guard = self.interrupted.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, wait) = self
            .wakeup
            .wait_timeout_while(guard, self.delay, |interrupted| !*interrupted)
            .unwrap_or_else(PoisonError::into_inner);
        if !wait.timed_out() {
            log::trace!("Pacing step cut short | Batch: {}", batch);
        }
    }

    fn finish(&self, _batch: BatchToken) {}

    fn name(&self) -> &'static str {
        "fixed_delay"
    }
}
