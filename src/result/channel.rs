//! 匹配通道与通道权重
use serde::{Deserialize, Serialize};
use std::fmt;

/// 产生结果的逻辑字节缓冲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchChannel {
    Content,
    Comment,
    Meta,
}

impl MatchChannel {
    /// 固定处理顺序
    pub const ORDERED: [MatchChannel; 3] = [MatchChannel::Content, MatchChannel::Comment, MatchChannel::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchChannel::Content => "CONTENT",
            MatchChannel::Comment => "COMMENT",
            MatchChannel::Meta => "META",
        }
    }
}

impl fmt::Display for MatchChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通道权重表（常量表，不随内容变化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelWeights {
    pub content: u32,
    pub comment: u32,
    pub meta: u32,
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self {
            content: 50,
            comment: 80,
            meta: 70,
        }
    }
}

impl ChannelWeights {
    #[inline]
    pub fn weight(&self, channel: MatchChannel) -> u32 {
        match channel {
            MatchChannel::Content => self.content,
            MatchChannel::Comment => self.comment,
            MatchChannel::Meta => self.meta,
        }
    }
}
