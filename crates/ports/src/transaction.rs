//! 事务存储 trait 定义
//!
//! 隔离级别、事务选项，以及事务型存储与存储事务的抽象

use async_trait::async_trait;
use relay_errors::AppResult;
use serde::{Deserialize, Serialize};

/// 事务隔离级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// 读未提交
    ReadUncommitted,
    /// 读已提交（PostgreSQL 默认）
    #[default]
    ReadCommitted,
    /// 可重复读
    RepeatableRead,
    /// 可串行化
    Serializable,
}

impl IsolationLevel {
    /// 转换为 SQL 字符串
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// 事务访问模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// 读写
    #[default]
    ReadWrite,
    /// 只读
    ReadOnly,
}

impl AccessMode {
    /// 转换为 SQL 字符串
    pub fn as_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// 事务选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// 隔离级别
    pub isolation_level: IsolationLevel,
    /// 访问模式
    pub access_mode: AccessMode,
    /// 是否可延迟（仅对 SERIALIZABLE READ ONLY 有效）
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    /// 设置为可串行化
    pub fn serializable(mut self) -> Self {
        self.isolation_level = IsolationLevel::Serializable;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.access_mode == AccessMode::ReadOnly
    }

    /// 生成 SET TRANSACTION 语句
    pub fn to_sql(&self) -> String {
        let mut parts = vec![
            format!("ISOLATION LEVEL {}", self.isolation_level.as_sql()),
            self.access_mode.as_sql().to_string(),
        ];

        if self.deferrable
            && self.isolation_level == IsolationLevel::Serializable
            && self.access_mode == AccessMode::ReadOnly
        {
            parts.push("DEFERRABLE".to_string());
        }

        format!("SET TRANSACTION {}", parts.join(", "))
    }
}

/// 事务型存储
///
/// 每次 `begin` 从连接池签出一个连接，由返回的事务独占，直到提交、回滚或被丢弃
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// 以给定选项开始事务
    async fn begin(&self, options: &TransactionOptions) -> AppResult<Self::Transaction>;
}

/// 存储事务
///
/// 实现者必须保证：未提交即被丢弃的事务会回滚并归还连接。
/// 串行化冲突必须以 `AppError::TransientConflict` 报告。
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    /// 创建 savepoint
    async fn savepoint(&mut self, name: &str) -> AppResult<()>;

    /// 回滚到 savepoint（软回滚，外层事务保持活跃）
    async fn rollback_to_savepoint(&mut self, name: &str) -> AppResult<()>;

    /// 释放 savepoint
    async fn release_savepoint(&mut self, name: &str) -> AppResult<()>;

    /// 提交事务并归还连接
    async fn commit(self) -> AppResult<()>;

    /// 回滚事务并归还连接
    async fn rollback(self) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_access_mode() {
        assert_eq!(AccessMode::ReadWrite.as_sql(), "READ WRITE");
        assert_eq!(AccessMode::ReadOnly.as_sql(), "READ ONLY");
    }

    #[test]
    fn test_serializable_options_sql() {
        let sql = TransactionOptions::new().serializable().to_sql();
        assert_eq!(sql, "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ WRITE");
    }

    #[test]
    fn test_deferrable_only_for_serializable_read_only() {
        let sql = TransactionOptions::new()
            .serializable()
            .read_only()
            .deferrable()
            .to_sql();
        assert!(sql.ends_with("READ ONLY, DEFERRABLE"));

        let sql = TransactionOptions::new().serializable().deferrable().to_sql();
        assert!(!sql.contains("DEFERRABLE"));
    }
}
