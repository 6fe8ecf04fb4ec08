//! PostgreSQL 连接管理

use relay_common::{is_retryable_error, with_conditional_retry};
use relay_errors::{AppError, AppResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{error, info};

use crate::config::PostgresConfig;

const PASSWORD_AUTH_FAILED: &str = "password authentication failed";

/// 创建 PostgreSQL 连接池
///
/// 连接类错误按 `connect_retry` 重试；认证失败时提示创建数据库用户
pub async fn create_pool(config: &PostgresConfig) -> AppResult<PgPool> {
    let url = config.connection_url();

    let pool = with_conditional_retry(
        &config.connect_retry,
        "postgres_connect",
        || {
            let mut options = PgPoolOptions::new()
                .max_connections(config.pool_max)
                .min_connections(config.pool_min)
                .acquire_timeout(config.acquire_timeout)
                .idle_timeout(config.idle_timeout);
            if let Some(lifetime) = config.max_lifetime {
                options = options.max_lifetime(lifetime);
            }
            let url = url.clone();
            async move { options.connect(&url).await }
        },
        |e: &sqlx::Error| is_retryable_error(&e.to_string()),
    )
    .await
    .map_err(|e| {
        let message = e.to_string();
        if let Some(hint) = password_hint(&message, config.username()) {
            error!(hint = %hint, "Database authentication failed");
        }
        AppError::resource(format!("Failed to create pool: {}", message))
    })?;

    info!(max_connections = config.pool_max, "PostgreSQL pool created");
    Ok(pool)
}

/// 认证失败时给出的操作提示
pub fn password_hint(error: &str, username: Option<&str>) -> Option<String> {
    if !error.to_lowercase().contains(PASSWORD_AUTH_FAILED) {
        return None;
    }

    let user = username.unwrap_or("relay");
    Some(format!(
        "The database user \"{user}\" must exist with the configured password. \
         Run: createuser -P {user} --createdb"
    ))
}
