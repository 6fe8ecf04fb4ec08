//! Redis 发布/订阅模块
//!
//! `RedisPublisher` 是 Outbox 的外部通道：提交后的消息通过 PUBLISH 发出。
//! 投递语义即 Redis Pub/Sub 的语义（至多一次，无订阅者时丢弃）。

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use relay_errors::{AppError, AppResult};
use relay_ports::ChannelPublisher;
use tracing::{debug, error, info};

use crate::config::{RedisConfig, prefixed};
use crate::connection::create_connection_manager;

/// Redis 发布者
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
    channel_prefix: Option<String>,
}

impl RedisPublisher {
    /// 创建新的发布者
    pub async fn new(config: &RedisConfig) -> AppResult<Self> {
        let conn = create_connection_manager(config).await?;
        Ok(Self {
            conn,
            channel_prefix: config.channel_prefix.clone(),
        })
    }

    /// 从连接管理器创建
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            channel_prefix: None,
        }
    }

    /// 设置频道前缀
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// 发布消息，返回收到消息的订阅者数量
    pub async fn publish_counted(&self, channel: &str, message: &str) -> AppResult<u64> {
        let channel = prefixed(self.channel_prefix.as_deref(), channel);
        // ConnectionManager 的克隆共享同一条多路复用连接
        let mut conn = self.conn.clone();

        let subscribers: u64 = conn
            .publish(&channel, message)
            .await
            .map_err(|e| AppError::resource(format!("Failed to publish to {}: {}", channel, e)))?;

        debug!(channel = %channel, subscribers, "Message published");
        Ok(subscribers)
    }
}

#[async_trait]
impl ChannelPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()> {
        self.publish_counted(channel, message).await.map(|_| ())
    }
}

/// 收到的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// 频道（含前缀）
    pub channel: String,
    pub payload: String,
}

/// Redis 订阅者
pub struct RedisSubscriber {
    client: Client,
    channel_prefix: Option<String>,
}

impl RedisSubscriber {
    pub fn new(config: &RedisConfig) -> AppResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::config(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            channel_prefix: config.channel_prefix.clone(),
        })
    }

    /// 订阅频道并逐条处理消息，直到连接关闭或处理函数返回错误
    pub async fn subscribe<F>(&self, channels: &[&str], mut handler: F) -> AppResult<()>
    where
        F: FnMut(ReceivedMessage) -> AppResult<()> + Send,
    {
        let channels: Vec<String> = channels
            .iter()
            .map(|c| prefixed(self.channel_prefix.as_deref(), c))
            .collect();

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::resource(format!("Failed to get pubsub connection: {}", e)))?;

        for channel in &channels {
            pubsub.subscribe(channel).await.map_err(|e| {
                AppError::resource(format!("Failed to subscribe to {}: {}", channel, e))
            })?;
        }

        info!(channels = ?channels, "Subscribed to channels");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "Failed to get message payload");
                    continue;
                }
            };

            handler(ReceivedMessage {
                channel: msg.get_channel_name().to_string(),
                payload,
            })?;
        }

        Ok(())
    }
}
