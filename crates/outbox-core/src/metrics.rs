//! Outbox / 事务指标

use metrics::{counter, histogram};

/// 记录事务结束（committed / rolled_back / aborted）
pub fn record_transaction(outcome: &'static str, duration_ms: f64) {
    let labels = [("outcome", outcome.to_string())];

    counter!("outbox_transactions_total", &labels).increment(1);
    histogram!("outbox_transaction_duration_ms", &labels).record(duration_ms);
}

/// 记录一次串行化冲突重试
pub fn record_serialization_retry() {
    counter!("outbox_serialization_retries_total").increment(1);
}

/// 记录重试预算耗尽
pub fn record_retry_budget_exhausted() {
    counter!("outbox_retry_budget_exhausted_total").increment(1);
}

/// 记录消息发布成功
pub fn record_message_published(channel: &str) {
    let labels = [("channel", channel.to_string())];
    counter!("outbox_messages_published_total", &labels).increment(1);
}

/// 记录提交后投递失败
pub fn record_delivery_failure(channel: &str) {
    let labels = [("channel", channel.to_string())];
    counter!("outbox_delivery_failures_total", &labels).increment(1);
}
