//! relay-outbox-core - 事务性 Outbox
//!
//! 在事务内缓冲待发布的消息，只有事务持久提交后才交给外部通道发布；
//! 事务回滚时静默丢弃。另外提供在 SERIALIZABLE 隔离级别下
//! 遇到串行化冲突自动重试整个工作单元的执行器。
//!
//! # 组成
//!
//! - `Outbox`: 单个事务独占的有序消息缓冲区
//! - `Lifecycle` / `TransactionHook`: 事务状态转换与观察者
//! - `Publisher`: 提交后的逐条发布
//! - `Transaction`: 显式传递给工作单元的事务句柄
//! - `TransactionScope`: begin / commit / rollback / release 周期
//! - `SerializableRetryExecutor`: 串行化冲突重试
//! - `memory`: 进程内存储与消息通道

pub mod executor;
pub mod hooks;
pub mod memory;
pub mod metrics;
pub mod outbox;
pub mod publisher;
pub mod scope;
pub mod transaction;

pub use executor::{AttemptOutcome, DEFAULT_MAX_ATTEMPTS, SerializableRetryExecutor};
pub use hooks::{Lifecycle, LoggingHook, TransactionHook};
pub use outbox::Outbox;
pub use publisher::Publisher;
pub use scope::TransactionScope;
pub use transaction::{Savepoint, Transaction, TransactionContext, TransactionState};
