//! relay-ports - 抽象 trait 层
//!
//! 定义存储、消息通道与冲突判定的抽象接口

mod conflict;
mod outbox;
mod transaction;

pub use conflict::*;
pub use outbox::*;
pub use transaction::*;
