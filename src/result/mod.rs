//! 结果模型：统一扫描结果、匹配通道、通道权重
pub mod channel;
pub mod scan_result;

pub use channel::{ChannelWeights, MatchChannel};
pub use scan_result::{Metadata, MatchingRule, Pattern, PatternMatch, ScanResult, WeightedResult};
