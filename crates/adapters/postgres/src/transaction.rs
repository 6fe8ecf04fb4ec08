//! PostgreSQL 事务型存储
//!
//! 每次 begin 从连接池签出一个连接并执行 `SET TRANSACTION`；
//! sqlx 的 `Transaction` 在未提交即被丢弃时自动回滚并归还连接。

use std::sync::Arc;

use async_trait::async_trait;
use relay_errors::{AppError, AppResult};
use relay_ports::{ConflictClassifier, StoreTransaction, TransactionOptions, TransactionalStore};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::classifier::{SqlStateClassifier, classify_sqlx_error};

type SharedClassifier = Arc<dyn ConflictClassifier<sqlx::Error>>;

/// PostgreSQL 事务型存储
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    classifier: SharedClassifier,
}

impl PostgresStore {
    /// 使用默认的 SQLSTATE 冲突判定
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            classifier: Arc::new(SqlStateClassifier::default()),
        }
    }

    /// 注入冲突判定策略
    pub fn with_classifier(mut self, classifier: SharedClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionalStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self, options: &TransactionOptions) -> AppResult<Self::Transaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| {
                classify_sqlx_error(self.classifier.as_ref(), e, "Failed to begin transaction")
            })?;

        sqlx::query(&options.to_sql())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                classify_sqlx_error(
                    self.classifier.as_ref(),
                    e,
                    "Failed to set transaction options",
                )
            })?;

        debug!(
            isolation = options.isolation_level.as_sql(),
            read_only = options.is_read_only(),
            "PostgreSQL transaction started"
        );

        Ok(PostgresTransaction {
            tx,
            classifier: self.classifier.clone(),
        })
    }
}

/// PostgreSQL 存储事务
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    classifier: SharedClassifier,
}

impl PostgresTransaction {
    /// 底层连接，用于执行领域查询
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// 用同一策略分类领域查询的错误
    pub fn classify(&self, error: sqlx::Error) -> AppError {
        classify_sqlx_error(self.classifier.as_ref(), error, "Query failed")
    }

    async fn execute_savepoint(&mut self, statement: &str, name: &str) -> AppResult<()> {
        validate_savepoint_name(name)?;

        let sql = format!("{} {}", statement, name);
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                let context = format!("Failed to {}", statement.to_lowercase());
                classify_sqlx_error(self.classifier.as_ref(), e, &context)
            })?;

        debug!(savepoint = %name, statement, "Savepoint statement executed");
        Ok(())
    }
}

/// savepoint 名称直接拼入 SQL，只允许标识符字符
fn validate_savepoint_name(name: &str) -> AppResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(format!("invalid savepoint name: {:?}", name)))
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn savepoint(&mut self, name: &str) -> AppResult<()> {
        self.execute_savepoint("SAVEPOINT", name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> AppResult<()> {
        self.execute_savepoint("ROLLBACK TO SAVEPOINT", name).await
    }

    async fn release_savepoint(&mut self, name: &str) -> AppResult<()> {
        self.execute_savepoint("RELEASE SAVEPOINT", name).await
    }

    async fn commit(self) -> AppResult<()> {
        let classifier = self.classifier;
        self.tx
            .commit()
            .await
            .map_err(|e| {
                classify_sqlx_error(classifier.as_ref(), e, "Failed to commit transaction")
            })
    }

    async fn rollback(self) -> AppResult<()> {
        let classifier = self.classifier;
        self.tx
            .rollback()
            .await
            .map_err(|e| {
                classify_sqlx_error(classifier.as_ref(), e, "Failed to rollback transaction")
            })
    }
}
