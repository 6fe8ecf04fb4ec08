//! relay-adapter-postgres - PostgreSQL 适配器
//!
//! 连接池创建、SQLSTATE 冲突判定与 `TransactionalStore` 实现

mod classifier;
mod config;
mod connection;
mod transaction;

pub use classifier::*;
pub use config::*;
pub use connection::*;
pub use transaction::*;
