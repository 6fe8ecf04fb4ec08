//! 事务内的待发布消息缓冲区

use relay_ports::OutboxMessage;

/// Outbox
///
/// 由单个事务独占，保持入队顺序。begin 与软回滚时清空，提交时一次性取出。
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Option<Vec<OutboxMessage>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空待发布消息
    pub fn reset(&mut self) {
        self.messages = Some(Vec::new());
    }

    /// 追加消息；缓冲区不存在时惰性创建
    pub fn enqueue(&mut self, channel: impl Into<String>, payload: impl Into<String>) {
        self.messages
            .get_or_insert_with(Vec::new)
            .push(OutboxMessage::new(channel, payload));
    }

    /// 取出全部消息并清空，仅供提交收尾调用
    pub(crate) fn drain(&mut self) -> Vec<OutboxMessage> {
        self.messages.take().unwrap_or_default()
    }

    /// 丢弃全部消息，返回丢弃的数量
    pub(crate) fn discard(&mut self) -> usize {
        self.messages.take().map(|m| m.len()).unwrap_or(0)
    }

    pub fn pending(&self) -> &[OutboxMessage] {
        self.messages.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_creates_buffer_lazily() {
        let mut outbox = Outbox::new();
        assert!(outbox.is_empty());

        outbox.enqueue("alerts", "job:42:done");
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending()[0], OutboxMessage::new("alerts", "job:42:done"));
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut outbox = Outbox::new();
        outbox.reset();
        outbox.enqueue("a", "1");
        outbox.enqueue("b", "2");
        outbox.enqueue("a", "3");

        let drained = outbox.drain();
        let payloads: Vec<_> = drained.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["1", "2", "3"]);
        assert!(outbox.is_empty());
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut outbox = Outbox::new();
        outbox.enqueue("a", "1");
        outbox.reset();
        assert!(outbox.is_empty());

        outbox.enqueue("a", "2");
        assert_eq!(outbox.discard(), 1);
        assert!(outbox.is_empty());
    }
}
