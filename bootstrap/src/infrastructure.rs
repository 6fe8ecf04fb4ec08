//! 基础设施资源管理
//!
//! 从配置创建 PostgreSQL 存储与 Redis 发布者，并提供共享同一
//! `Lifecycle` 的事务作用域与串行化重试执行器

use std::sync::Arc;
use std::time::Duration;

use relay_adapter_postgres::{PostgresConfig, PostgresStore, create_pool};
use relay_adapter_redis::{RedisConfig, RedisPublisher};
use relay_common::RetryConfig;
use relay_config::{AppConfig, TransactionConfig};
use relay_errors::AppResult;
use relay_outbox_core::{
    Lifecycle, LoggingHook, Publisher, SerializableRetryExecutor, TransactionHook,
    TransactionScope,
};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use tracing::info;

/// 基础设施资源容器
pub struct Infrastructure {
    /// 应用配置
    config: AppConfig,
    /// PostgreSQL 连接池
    pool: PgPool,
    store: Arc<PostgresStore>,
    publisher: Arc<RedisPublisher>,
    /// scope 与 executor 共享的生命周期
    lifecycle: Arc<Lifecycle>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        Self::from_config_with_hooks(config, Vec::new()).await
    }

    /// 从配置创建基础设施资源，并注册额外的事务观察者
    pub async fn from_config_with_hooks(
        config: AppConfig,
        hooks: Vec<Arc<dyn TransactionHook>>,
    ) -> AppResult<Self> {
        // 1. PostgreSQL 连接池（连接类错误重试，认证失败给出提示）
        let pg_config = PostgresConfig::new(config.database.url.expose_secret())
            .with_pool(1, config.database.max_connections)
            .with_acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
            .with_application_name(&config.app_name);
        let pool = create_pool(&pg_config).await?;
        let store = Arc::new(PostgresStore::new(pool.clone()));

        // 2. Redis 发布者
        let mut redis_config = RedisConfig::new(config.redis.url.expose_secret());
        if let Some(prefix) = &config.redis.channel_prefix {
            redis_config = redis_config.with_channel_prefix(prefix);
        }
        let publisher = Arc::new(RedisPublisher::new(&redis_config).await?);
        info!("Redis publisher created");

        // 3. 生命周期
        let mut lifecycle =
            Lifecycle::new(Publisher::new(publisher.clone())).with_hook(Arc::new(LoggingHook));
        for hook in hooks {
            lifecycle = lifecycle.with_hook(hook);
        }
        info!(hooks = lifecycle.hook_count(), "Transaction lifecycle ready");

        Ok(Self {
            config,
            pool,
            store,
            publisher,
            lifecycle: Arc::new(lifecycle),
        })
    }

    /// 获取应用配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取 PostgreSQL 连接池
    pub fn postgres_pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn store(&self) -> Arc<PostgresStore> {
        self.store.clone()
    }

    pub fn publisher(&self) -> Arc<RedisPublisher> {
        self.publisher.clone()
    }

    /// 新的事务作用域（READ COMMITTED，按配置决定是否自动提交）
    pub fn scope(&self) -> TransactionScope<PostgresStore> {
        TransactionScope::new(self.store.clone(), self.lifecycle.clone())
            .commit_on_success(self.config.transaction.commit_on_success)
    }

    /// 新的串行化重试执行器
    pub fn executor(&self) -> SerializableRetryExecutor<PostgresStore> {
        SerializableRetryExecutor::new(self.store.clone(), self.lifecycle.clone())
            .with_max_attempts(self.config.transaction.max_attempts)
            .with_backoff(retry_config(&self.config.transaction))
    }
}

/// 由事务配置生成重试配置
pub fn retry_config(config: &TransactionConfig) -> RetryConfig {
    let initial = Duration::from_millis(config.backoff_initial_ms);
    let max = Duration::from_millis(config.backoff_max_ms.max(config.backoff_initial_ms));
    RetryConfig::new(config.max_attempts.max(1), initial, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_config_is_immediate() {
        let retry = retry_config(&TransactionConfig::default());
        assert_eq!(retry.max_attempts, 100);
        assert!(retry.delay_for_attempt(0).is_zero());
        assert!(retry.delay_for_attempt(99).is_zero());
    }

    #[test]
    fn test_backoff_from_config() {
        let retry = retry_config(&TransactionConfig {
            max_attempts: 0,
            backoff_initial_ms: 10,
            backoff_max_ms: 40,
            commit_on_success: true,
        });

        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(40));
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let retry = retry_config(&TransactionConfig {
            backoff_initial_ms: 50,
            backoff_max_ms: 0,
            ..TransactionConfig::default()
        });
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(50));
    }
}
