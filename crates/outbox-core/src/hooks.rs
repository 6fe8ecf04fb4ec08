//! 事务生命周期钩子
//!
//! 将 Outbox 的清空 / 发布绑定到事务状态转换上。
//! 钩子列表归属于单个 scope 的 `Lifecycle`，不存在进程级的全局注册。

use std::sync::Arc;

use async_trait::async_trait;
use relay_errors::AppError;
use tracing::{debug, error, info};

use crate::outbox::Outbox;
use crate::publisher::Publisher;
use crate::transaction::TransactionContext;

/// 事务生命周期观察者
///
/// 所有方法默认为空实现。内置的 Outbox 行为总是先于观察者执行。
#[async_trait]
pub trait TransactionHook: Send + Sync {
    /// 事务开始，Outbox 已清空
    async fn after_begin(&self, _ctx: &TransactionContext) {}

    /// 回滚到 savepoint，Outbox 已清空
    async fn after_soft_rollback(&self, _ctx: &TransactionContext, _savepoint: &str) {}

    /// 事务已持久提交，消息已交给 Publisher
    async fn after_commit(&self, _ctx: &TransactionContext, _published: usize) {}

    /// 事务已回滚，Outbox 已丢弃
    async fn after_rollback(&self, _ctx: &TransactionContext) {}

    /// 提交后投递失败（已提交的数据不受影响）
    async fn on_delivery_failure(&self, _ctx: &TransactionContext, _error: &AppError) {}
}

/// 将每次状态转换写入 tracing 的观察者
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

#[async_trait]
impl TransactionHook for LoggingHook {
    async fn after_begin(&self, ctx: &TransactionContext) {
        debug!(tx_id = %ctx.id, isolation = ?ctx.isolation_level, "Transaction began");
    }

    async fn after_soft_rollback(&self, ctx: &TransactionContext, savepoint: &str) {
        debug!(tx_id = %ctx.id, savepoint, "Transaction rolled back to savepoint");
    }

    async fn after_commit(&self, ctx: &TransactionContext, published: usize) {
        info!(
            tx_id = %ctx.id,
            published,
            elapsed_ms = ctx.elapsed_ms(),
            "Transaction committed"
        );
    }

    async fn after_rollback(&self, ctx: &TransactionContext) {
        debug!(tx_id = %ctx.id, elapsed_ms = ctx.elapsed_ms(), "Transaction rolled back");
    }

    async fn on_delivery_failure(&self, ctx: &TransactionContext, error: &AppError) {
        for failure in error.delivery_failures() {
            error!(
                tx_id = %ctx.id,
                channel = %failure.channel,
                payload = %failure.payload,
                reason = %failure.reason,
                "Committed message was not delivered"
            );
        }
    }
}

/// 单个 scope 拥有的生命周期：Publisher 与观察者列表
pub struct Lifecycle {
    publisher: Publisher,
    hooks: Vec<Arc<dyn TransactionHook>>,
}

impl Lifecycle {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            hooks: Vec::new(),
        }
    }

    /// 追加观察者
    pub fn with_hook(mut self, hook: Arc<dyn TransactionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub(crate) async fn after_begin(&self, ctx: &TransactionContext, outbox: &mut Outbox) {
        debug!(tx_id = %ctx.id, "Clearing message queue due to begin");
        outbox.reset();

        for hook in &self.hooks {
            hook.after_begin(ctx).await;
        }
    }

    pub(crate) async fn after_soft_rollback(
        &self,
        ctx: &TransactionContext,
        outbox: &mut Outbox,
        savepoint: &str,
    ) {
        debug!(
            tx_id = %ctx.id,
            savepoint,
            discarded = outbox.len(),
            "Clearing message queue due to rollback"
        );
        outbox.reset();

        for hook in &self.hooks {
            hook.after_soft_rollback(ctx, savepoint).await;
        }
    }

    /// 提交收尾：取出 Outbox 并发布
    ///
    /// 只能在存储已持久提交之后调用。投递失败交给观察者，不影响已提交的数据。
    pub(crate) async fn after_commit(
        &self,
        ctx: &TransactionContext,
        outbox: &mut Outbox,
    ) -> usize {
        let messages = outbox.drain();
        let attempted = messages.len();

        let published = match self.publisher.publish_all(messages).await {
            Ok(published) => published,
            Err(e) => {
                error!(tx_id = %ctx.id, error = %e, "Post-commit delivery failed");
                for hook in &self.hooks {
                    hook.on_delivery_failure(ctx, &e).await;
                }
                attempted - e.delivery_failures().len()
            }
        };

        for hook in &self.hooks {
            hook.after_commit(ctx, published).await;
        }

        published
    }

    pub(crate) async fn after_rollback(&self, ctx: &TransactionContext, outbox: &mut Outbox) {
        let discarded = outbox.discard();
        debug!(tx_id = %ctx.id, discarded, "Discarding message queue due to rollback");

        for hook in &self.hooks {
            hook.after_rollback(ctx).await;
        }
    }
}
