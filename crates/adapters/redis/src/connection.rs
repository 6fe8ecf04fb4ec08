//! Redis 连接管理

use relay_common::{is_retryable_error, with_conditional_retry};
use relay_errors::{AppError, AppResult};
use redis::Client;
use redis::aio::ConnectionManager;

use crate::config::RedisConfig;

/// 创建 Redis 连接管理器
///
/// 连接类错误按 `connect_retry` 重试；ConnectionManager 断线后自动重连
pub async fn create_connection_manager(config: &RedisConfig) -> AppResult<ConnectionManager> {
    let client = Client::open(config.url.as_str())
        .map_err(|e| AppError::config(format!("Invalid Redis URL: {}", e)))?;

    with_conditional_retry(
        &config.connect_retry,
        "redis_connect",
        || ConnectionManager::new(client.clone()),
        |e: &redis::RedisError| is_retryable_error(&e.to_string()),
    )
    .await
    .map_err(|e| AppError::resource(format!("Failed to create Redis connection manager: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = RedisConfig::new("not a redis url");
        let err = create_connection_manager(&config).await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
