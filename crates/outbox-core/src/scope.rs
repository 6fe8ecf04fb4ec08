//! 事务作用域
//!
//! 负责一个工作单元的 begin / commit / rollback / release 周期，
//! 保证每条退出路径上都完成清理并驱动生命周期钩子。

use std::sync::Arc;

use futures::future::BoxFuture;
use relay_errors::AppResult;
use relay_ports::{TransactionOptions, TransactionalStore};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::hooks::Lifecycle;
use crate::transaction::{Transaction, TransactionContext};

/// 事务作用域
///
/// # 使用示例
///
/// ```ignore
/// let scope = TransactionScope::new(store, lifecycle).commit_on_success(true);
///
/// let job_id = scope
///     .enter(|tx| {
///         Box::pin(async move {
///             tx.store()?.put("job:42", "done")?;
///             tx.enqueue("alerts", "job:42:done")?;
///             Ok(42)
///         })
///     })
///     .await?;
/// ```
pub struct TransactionScope<S: TransactionalStore> {
    store: Arc<S>,
    lifecycle: Arc<Lifecycle>,
    options: TransactionOptions,
    commit_on_success: bool,
}

impl<S: TransactionalStore> Clone for TransactionScope<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            options: self.options.clone(),
            commit_on_success: self.commit_on_success,
        }
    }
}

impl<S: TransactionalStore> TransactionScope<S> {
    pub fn new(store: Arc<S>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            store,
            lifecycle,
            options: TransactionOptions::default(),
            commit_on_success: false,
        }
    }

    /// 设置事务选项（隔离级别、访问模式）
    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// 工作单元成功返回后是否自动提交
    pub fn commit_on_success(mut self, enabled: bool) -> Self {
        self.commit_on_success = enabled;
        self
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn commits_on_success(&self) -> bool {
        self.commit_on_success
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// 在新事务中运行工作单元
    ///
    /// - 工作单元返回错误：先回滚再返回原错误；回滚失败只记录日志
    /// - 工作单元成功且开启 commit-on-success：提交并发布 Outbox
    /// - 工作单元成功但未提交：事务不提交直接关闭，Outbox 被丢弃
    ///
    /// 工作单元也可以自行调用 `Transaction::commit` / `Transaction::rollback`。
    /// 连接在所有路径上都会归还。
    pub async fn enter<T, F>(&self, work: F) -> AppResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<S::Transaction>) -> BoxFuture<'t, AppResult<T>>
            + Send,
        T: Send,
    {
        let inner = self.store.begin(&self.options).await?;
        let context = TransactionContext::new(&self.options);
        let mut tx = Transaction::begin(inner, context, self.lifecycle.clone()).await;

        let result = work(&mut tx).await;
        let result = self.finish(&mut tx, result).await;

        tx.close();
        debug!(tx_id = %tx.id(), "Transaction scope complete, connection released");
        result
    }

    /// 与 `enter` 相同，但在带有 worker 名称的 span 中运行
    pub async fn enter_named<T, F>(&self, name: &str, work: F) -> AppResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<S::Transaction>) -> BoxFuture<'t, AppResult<T>>
            + Send,
        T: Send,
    {
        let span = info_span!("transaction_scope", worker = %name);
        async move {
            debug!(worker = %name, "Running worker in scoped transaction");
            self.enter(work).await
        }
        .instrument(span)
        .await
    }

    async fn finish<T>(
        &self,
        tx: &mut Transaction<S::Transaction>,
        result: AppResult<T>,
    ) -> AppResult<T> {
        match result {
            Ok(value) => {
                if !tx.is_active() {
                    return Ok(value);
                }

                if self.commit_on_success {
                    tx.commit().await?;
                    debug!(tx_id = %tx.id(), "Transaction auto-committed as requested");
                } else if let Err(e) = tx.rollback().await {
                    warn!(
                        tx_id = %tx.id(),
                        error = %e,
                        "Failed to close uncommitted transaction"
                    );
                }
                Ok(value)
            }
            Err(e) => {
                if e.is_transient_conflict() {
                    warn!(
                        tx_id = %tx.id(),
                        error = %e,
                        "Serialization conflict in scoped transaction, rolling back"
                    );
                } else {
                    error!(
                        tx_id = %tx.id(),
                        error = %e,
                        "Error during scoped transaction, rolling back"
                    );
                }

                if tx.is_active() {
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(
                            tx_id = %tx.id(),
                            error = %rollback_err,
                            original_error = %e,
                            "Rollback failed, propagating original error"
                        );
                    }
                }
                Err(e)
            }
        }
    }
}
