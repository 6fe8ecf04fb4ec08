//! relay-errors - 统一错误处理
//!
//! 事务 / Outbox 子系统的错误分类：
//! 可重试的串行化冲突、资源错误、领域错误、重试预算耗尽、提交后投递失败

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 串行化冲突（事务视图被并发提交的事务破坏），可重试
    #[error("Serialization conflict: {0}")]
    TransientConflict(String),

    /// 连接 / 连接池错误，本层不重试
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    /// 在非活跃事务上的操作（例如提交后继续入队）
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// 重试预算耗尽，携带最后一次冲突
    #[error("Could not commit serialized transaction after {attempts} attempts")]
    RetryBudgetExhausted {
        attempts: u32,
        #[source]
        last_conflict: Box<AppError>,
    },

    /// 事务已提交，但消息投递失败
    #[error("Post-commit delivery failed for {} of {attempted} messages", .failures.len())]
    PostCommitDelivery {
        attempted: usize,
        failures: Vec<DeliveryFailure>,
    },
}

/// 错误大类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 可重试的串行化冲突
    TransientConflict,
    /// 连接 / 连接池错误
    Resource,
    /// 工作单元自身抛出的错误
    Domain,
    /// 存储或内部的不可重试错误
    Fatal,
    /// 重试预算耗尽
    RetryBudgetExhausted,
    /// 提交后投递失败
    PostCommitDelivery,
}

impl AppError {
    pub fn transient_conflict(msg: impl Into<String>) -> Self {
        Self::TransientConflict(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 包装最后一次冲突为预算耗尽错误
    pub fn retry_budget_exhausted(attempts: u32, last_conflict: AppError) -> Self {
        Self::RetryBudgetExhausted {
            attempts,
            last_conflict: Box::new(last_conflict),
        }
    }

    pub fn post_commit_delivery(attempted: usize, failures: Vec<DeliveryFailure>) -> Self {
        Self::PostCommitDelivery {
            attempted,
            failures,
        }
    }

    /// 归类到错误大类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientConflict(_) => ErrorKind::TransientConflict,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Domain(_) | Self::NotFound(_) | Self::Validation(_) => ErrorKind::Domain,
            Self::Database(_) | Self::InvalidState(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Fatal
            }
            Self::RetryBudgetExhausted { .. } => ErrorKind::RetryBudgetExhausted,
            Self::PostCommitDelivery { .. } => ErrorKind::PostCommitDelivery,
        }
    }

    /// 是否为可重试的串行化冲突
    pub fn is_transient_conflict(&self) -> bool {
        matches!(self, Self::TransientConflict(_))
    }

    /// 投递失败列表（仅 PostCommitDelivery 有值）
    pub fn delivery_failures(&self) -> &[DeliveryFailure] {
        match self {
            Self::PostCommitDelivery { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// 单条消息的投递失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub channel: String,
    pub payload: String,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(
        channel: impl Into<String>,
        payload: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            reason: reason.into(),
        }
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
