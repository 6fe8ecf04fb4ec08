//! relay-bootstrap - 启动装配
//!
//! 从 `AppConfig` 创建存储、发布者与事务执行器

mod infrastructure;
mod runtime;

pub use infrastructure::*;
pub use runtime::*;
