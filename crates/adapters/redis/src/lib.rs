//! relay-adapter-redis - Redis 适配器
//!
//! Outbox 消息通过 Redis PUBLISH 发出

mod config;
mod connection;
mod pubsub;

pub use config::*;
pub use connection::*;
pub use pubsub::*;
