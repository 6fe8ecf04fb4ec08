//! Redis 配置模块

use relay_common::RetryConfig;

/// Redis 配置
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,
    /// 频道前缀
    pub channel_prefix: Option<String>,
    /// 建立连接时的重试（仅针对连接类错误）
    pub connect_retry: RetryConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            channel_prefix: None,
            connect_retry: RetryConfig::default(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置频道前缀
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// 获取带前缀的频道名
    pub fn prefixed_channel(&self, channel: &str) -> String {
        prefixed(self.channel_prefix.as_deref(), channel)
    }
}

pub(crate) fn prefixed(prefix: Option<&str>, channel: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, channel),
        _ => channel.to_string(),
    }
}
