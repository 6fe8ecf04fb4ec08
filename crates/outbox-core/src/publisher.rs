//! 提交后的消息发布

use std::sync::Arc;

use relay_errors::{AppError, AppResult, DeliveryFailure};
use relay_ports::{ChannelPublisher, OutboxMessage};
use tracing::{debug, warn};

use crate::metrics;

/// Publisher
///
/// 按记录顺序逐条调用外部通道，每个 (channel, message) 对调用一次。
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn ChannelPublisher>,
}

impl Publisher {
    pub fn new(channel: Arc<dyn ChannelPublisher>) -> Self {
        Self { channel }
    }

    /// 发布全部消息
    ///
    /// 单条失败不会中断后续消息；存在失败时返回 `AppError::PostCommitDelivery`，
    /// 其中包含每条失败的消息。成功时返回发布条数。
    pub async fn publish_all(&self, messages: Vec<OutboxMessage>) -> AppResult<usize> {
        let attempted = messages.len();
        let mut failures = Vec::new();

        for message in messages {
            debug!(
                channel = %message.channel,
                payload = %message.payload,
                "Publishing message"
            );

            match self
                .channel
                .publish(&message.channel, &message.payload)
                .await
            {
                Ok(()) => metrics::record_message_published(&message.channel),
                Err(e) => {
                    warn!(
                        channel = %message.channel,
                        error = %e,
                        "Failed to publish message"
                    );
                    metrics::record_delivery_failure(&message.channel);
                    failures.push(DeliveryFailure::new(
                        message.channel,
                        message.payload,
                        e.to_string(),
                    ));
                }
            }
        }

        if failures.is_empty() {
            Ok(attempted)
        } else {
            Err(AppError::post_commit_delivery(attempted, failures))
        }
    }
}
