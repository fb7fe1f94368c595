//! 扫描模块：多通道编排器 + 全局单例
pub mod global;
pub mod orchestrator;

pub use self::global::{global_scanner, init_global_scanner, init_global_scanner_with};
pub use self::orchestrator::{ScanOutcome, Scanner};
