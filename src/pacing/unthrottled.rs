use std::sync::atomic::{AtomicU64, Ordering};

use super::{BatchToken, PacingStrategy};

/// 不限速：begin 返回递增计数，step / finish 为空操作
#[derive(Debug, Default)]
pub struct Unthrottled {
    counter: AtomicU64,
}

impl Unthrottled {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacingStrategy for Unthrottled {
    fn begin(&self) -> BatchToken {
        BatchToken::new(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn step(&self, _batch: BatchToken) {}

    fn finish(&self, _batch: BatchToken) {}

    fn name(&self) -> &'static str {
        "unthrottled"
    }
}
