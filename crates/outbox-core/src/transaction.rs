//! 事务句柄
//!
//! 由 `TransactionScope` 创建并显式传给工作单元，独占一个存储事务与一个 Outbox。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_errors::{AppError, AppResult};
use relay_ports::{IsolationLevel, StoreTransaction, TransactionOptions};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hooks::Lifecycle;
use crate::metrics;
use crate::outbox::Outbox;

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    /// scope 退出，连接已归还
    Closed,
}

/// 事务上下文（用于日志与钩子）
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// 事务 ID
    pub id: Uuid,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 隔离级别
    pub isolation_level: IsolationLevel,
    /// 是否只读
    pub read_only: bool,
}

impl TransactionContext {
    pub fn new(options: &TransactionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            isolation_level: options.isolation_level,
            read_only: options.is_read_only(),
        }
    }

    /// 自开始以来经过的毫秒数
    pub fn elapsed_ms(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64
    }
}

/// Savepoint 令牌
///
/// 名称由事务句柄生成，回滚或释放时被消费
#[derive(Debug, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 事务句柄
pub struct Transaction<T: StoreTransaction> {
    inner: Option<T>,
    outbox: Outbox,
    context: TransactionContext,
    state: TransactionState,
    lifecycle: Arc<Lifecycle>,
    savepoint_seq: u32,
}

impl<T: StoreTransaction> Transaction<T> {
    /// 包装已开始的存储事务，并在任何领域代码运行前执行 begin 钩子
    pub(crate) async fn begin(
        inner: T,
        context: TransactionContext,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        let mut tx = Self {
            inner: Some(inner),
            outbox: Outbox::new(),
            context,
            state: TransactionState::Active,
            lifecycle,
            savepoint_seq: 0,
        };

        tx.lifecycle.after_begin(&tx.context, &mut tx.outbox).await;
        tx
    }

    pub fn id(&self) -> Uuid {
        self.context.id
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// 当前事务的 Outbox（只读视图）
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// 底层存储事务，用于执行领域读写
    pub fn store(&mut self) -> AppResult<&mut T> {
        self.ensure_active("access the store")?;
        self.inner
            .as_mut()
            .ok_or_else(|| AppError::invalid_state("transaction has no store handle"))
    }

    /// 将消息加入当前事务的 Outbox
    ///
    /// 事务提交后才会发布；事务不再活跃时返回 `InvalidState`
    pub fn enqueue(
        &mut self,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> AppResult<()> {
        self.ensure_active("enqueue a message")?;

        let channel = channel.into();
        let message = message.into();
        debug!(
            tx_id = %self.context.id,
            channel = %channel,
            payload = %message,
            "Enqueueing message"
        );
        self.outbox.enqueue(channel, message);
        Ok(())
    }

    /// 创建 savepoint
    pub async fn savepoint(&mut self) -> AppResult<Savepoint> {
        self.savepoint_seq += 1;
        let name = format!("sp_{}", self.savepoint_seq);

        self.store()?.savepoint(&name).await?;
        debug!(tx_id = %self.context.id, savepoint = %name, "Savepoint created");
        Ok(Savepoint { name })
    }

    /// 软回滚：回滚到 savepoint，外层事务保持活跃，Outbox 被清空
    pub async fn rollback_to(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.store()?.rollback_to_savepoint(&savepoint.name).await?;
        self.lifecycle
            .after_soft_rollback(&self.context, &mut self.outbox, &savepoint.name)
            .await;
        Ok(())
    }

    /// 释放 savepoint
    pub async fn release(&mut self, savepoint: Savepoint) -> AppResult<()> {
        self.store()?.release_savepoint(&savepoint.name).await?;
        debug!(tx_id = %self.context.id, savepoint = %savepoint.name, "Savepoint released");
        Ok(())
    }

    /// 提交事务
    ///
    /// 存储提交成功后才取出并发布 Outbox；提交失败时 Outbox 被丢弃并返回存储错误。
    /// 投递失败只通知观察者，不会作为错误返回。
    pub async fn commit(&mut self) -> AppResult<()> {
        let inner = self.take_active("commit")?;

        match inner.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                metrics::record_transaction("committed", self.context.elapsed_ms());
                let published = self
                    .lifecycle
                    .after_commit(&self.context, &mut self.outbox)
                    .await;
                debug!(tx_id = %self.context.id, published, "Transaction commit finalized");
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                metrics::record_transaction("commit_failed", self.context.elapsed_ms());
                self.lifecycle
                    .after_rollback(&self.context, &mut self.outbox)
                    .await;
                Err(e)
            }
        }
    }

    /// 回滚事务
    ///
    /// 无论存储回滚是否成功，Outbox 都会被丢弃，连接都会归还
    pub async fn rollback(&mut self) -> AppResult<()> {
        let inner = self.take_active("roll back")?;

        let result = inner.rollback().await;
        self.state = TransactionState::RolledBack;
        metrics::record_transaction("rolled_back", self.context.elapsed_ms());
        self.lifecycle
            .after_rollback(&self.context, &mut self.outbox)
            .await;
        result
    }

    /// scope 退出时调用
    pub(crate) fn close(&mut self) {
        self.state = TransactionState::Closed;
    }

    fn ensure_active(&self, action: &str) -> AppResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(AppError::invalid_state(format!(
                "cannot {} on transaction {} in state {:?}",
                action, self.context.id, self.state
            )))
        }
    }

    fn take_active(&mut self, action: &str) -> AppResult<T> {
        self.ensure_active(action)?;
        self.inner
            .take()
            .ok_or_else(|| AppError::invalid_state("transaction has no store handle"))
    }
}

impl<T: StoreTransaction> Drop for Transaction<T> {
    fn drop(&mut self) {
        // 未结束即被丢弃（例如调用方取消）：存储事务随之回滚，Outbox 随之丢弃
        if self.inner.is_some() {
            warn!(
                tx_id = %self.context.id,
                discarded = self.outbox.len(),
                "Transaction dropped while active, rolling back"
            );
            metrics::record_transaction("aborted", self.context.elapsed_ms());
        }
    }
}
