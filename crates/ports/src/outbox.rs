//! Outbox 消息与消息通道 trait 定义

use async_trait::async_trait;
use relay_errors::AppResult;
use serde::{Deserialize, Serialize};

/// Outbox 消息：不透明的 (channel, payload) 对
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub channel: String,
    pub payload: String,
}

impl OutboxMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// 外部消息通道
///
/// 投递与顺序保证完全继承自具体实现（例如 Redis PUBLISH）
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// 向频道发布一条消息
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()>;
}
