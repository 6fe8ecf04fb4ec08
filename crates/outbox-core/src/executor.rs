//! 串行化重试执行器
//!
//! 在 SERIALIZABLE 隔离级别下运行工作单元，遇到串行化冲突时
//! 在全新的事务中重新执行整个工作单元，直到成功或预算耗尽。

use std::sync::Arc;

use futures::future::BoxFuture;
use relay_common::RetryConfig;
use relay_errors::{AppError, AppResult};
use relay_ports::{TransactionOptions, TransactionalStore};
use tracing::{debug, info, warn};

use crate::hooks::Lifecycle;
use crate::metrics;
use crate::scope::TransactionScope;
use crate::transaction::Transaction;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// 单次尝试的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 已提交
    Committed,
    /// 串行化冲突，可重试
    Conflict,
    /// 其他错误，立即返回
    Failed,
}

impl AttemptOutcome {
    pub fn of<T>(result: &AppResult<T>) -> Self {
        match result {
            Ok(_) => AttemptOutcome::Committed,
            Err(e) if e.is_transient_conflict() => AttemptOutcome::Conflict,
            Err(_) => AttemptOutcome::Failed,
        }
    }
}

/// 串行化重试执行器
///
/// 工作单元可能被执行多次，因此必须是 `FnMut`，且除了通过事务句柄之外
/// 不应产生外部副作用。每次尝试都有独立的事务与 Outbox，
/// 失败尝试中入队的消息永远不会被发布。
pub struct SerializableRetryExecutor<S: TransactionalStore> {
    scope: TransactionScope<S>,
    config: RetryConfig,
}

impl<S: TransactionalStore> Clone for SerializableRetryExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: TransactionalStore> SerializableRetryExecutor<S> {
    /// 创建执行器：SERIALIZABLE、成功即提交、无退避、最多 100 次尝试
    pub fn new(store: Arc<S>, lifecycle: Arc<Lifecycle>) -> Self {
        let scope = TransactionScope::new(store, lifecycle)
            .with_options(TransactionOptions::new().serializable())
            .commit_on_success(true);

        Self {
            scope,
            config: RetryConfig::immediate(DEFAULT_MAX_ATTEMPTS),
        }
    }

    /// 设置最大尝试次数（至少为 1）
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts.max(1);
        self
    }

    /// 设置尝试之间的退避
    ///
    /// 只取延迟、上限与乘数；尝试次数仍由 `with_max_attempts` 决定
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.config = RetryConfig {
            max_attempts: self.config.max_attempts,
            ..backoff
        };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn scope(&self) -> &TransactionScope<S> {
        &self.scope
    }

    /// 运行工作单元，冲突时重试
    ///
    /// - 成功：返回工作单元的结果，事务已提交，Outbox 已发布
    /// - 非冲突错误：不重试，原样返回
    /// - 冲突次数达到上限：返回 `AppError::RetryBudgetExhausted`，携带最后一次冲突
    pub async fn run_serialized<T, F>(&self, mut work: F) -> AppResult<T>
    where
        F: for<'t> FnMut(&'t mut Transaction<S::Transaction>) -> BoxFuture<'t, AppResult<T>>
            + Send,
        T: Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = self.scope.enter(&mut work).await;
            let outcome = AttemptOutcome::of(&result);
            debug!(attempt, ?outcome, "Serialized transaction attempt finished");

            let conflict = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "Serialized transaction committed after retry");
                    }
                    return Ok(value);
                }
                Err(e) if outcome == AttemptOutcome::Conflict => e,
                Err(e) => return Err(e),
            };

            if attempt >= max_attempts {
                metrics::record_retry_budget_exhausted();
                warn!(
                    attempts = attempt,
                    error = %conflict,
                    "Retry budget exhausted for serialized transaction"
                );
                return Err(AppError::retry_budget_exhausted(attempt, conflict));
            }

            metrics::record_serialization_retry();
            let delay = self.config.delay_for_attempt(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                error = %conflict,
                delay_ms = delay.as_millis() as u64,
                "Serialization conflict, retrying transaction"
            );

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, RecordingPublisher};
    use crate::publisher::Publisher;
    use relay_ports::IsolationLevel;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn executor(
        store: &InMemoryStore,
        channel: &RecordingPublisher,
    ) -> SerializableRetryExecutor<InMemoryStore> {
        let lifecycle = Lifecycle::new(Publisher::new(Arc::new(channel.clone())));
        SerializableRetryExecutor::new(Arc::new(store.clone()), Arc::new(lifecycle))
    }

    #[test]
    fn test_attempt_outcome() {
        assert_eq!(AttemptOutcome::of(&Ok::<_, AppError>(1)), AttemptOutcome::Committed);
        assert_eq!(
            AttemptOutcome::of::<()>(&Err(AppError::transient_conflict("40001"))),
            AttemptOutcome::Conflict
        );
        assert_eq!(
            AttemptOutcome::of::<()>(&Err(AppError::domain("rejected"))),
            AttemptOutcome::Failed
        );
    }

    #[test]
    fn test_max_attempts_clamped() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();

        assert_eq!(executor(&store, &channel).max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(executor(&store, &channel).with_max_attempts(0).max_attempts(), 1);
        assert_eq!(
            executor(&store, &channel)
                .with_backoff(RetryConfig::immediate(0))
                .max_attempts(),
            DEFAULT_MAX_ATTEMPTS
        );
    }

    #[test]
    fn test_backoff_keeps_budget_in_any_order() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let backoff = RetryConfig::new(3, Duration::from_millis(5), Duration::from_millis(20));

        let budget_first = executor(&store, &channel)
            .with_max_attempts(10)
            .with_backoff(backoff.clone());
        let backoff_first = executor(&store, &channel)
            .with_backoff(backoff)
            .with_max_attempts(10);

        assert_eq!(budget_first.retry_config(), backoff_first.retry_config());
        assert_eq!(budget_first.max_attempts(), 10);
        assert_eq!(
            budget_first.retry_config().max_delay,
            Duration::from_millis(20)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_survives_later_backoff() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel)
            .with_max_attempts(10)
            .with_backoff(RetryConfig::new(3, Duration::ZERO, Duration::ZERO));
        let calls = AtomicU32::new(0);

        let err = executor
            .run_serialized(|_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Err::<(), _>(AppError::transient_conflict("40001")) })
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert!(matches!(
            err,
            AppError::RetryBudgetExhausted { attempts: 10, .. }
        ));
    }

    #[tokio::test]
    async fn test_runs_serializable_and_commits() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel);

        executor
            .run_serialized(|tx| {
                Box::pin(async move {
                    assert_eq!(tx.context().isolation_level, IsolationLevel::Serializable);
                    tx.store()?.put("job:7", "done")?;
                    tx.enqueue("alerts", "job:7:done")
                })
            })
            .await
            .unwrap();

        assert_eq!(store.last_isolation_level(), Some(IsolationLevel::Serializable));
        assert_eq!(store.get("job:7"), Some("done".to_string()));
        assert_eq!(channel.published().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel);
        let attempts = AtomicU32::new(0);

        let value = executor
            .run_serialized(|tx| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move {
                    tx.enqueue("alerts", format!("attempt:{n}"))?;
                    if n < 3 {
                        return Err(AppError::transient_conflict("could not serialize access"));
                    }
                    Ok(n)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 只有成功的那次尝试的消息被发布
        assert_eq!(
            channel.published_pairs(),
            vec![("alerts".to_string(), "attempt:3".to_string())]
        );
        assert_eq!(store.stats().rolled_back, 2);
        assert_eq!(store.checked_out(), 0);
    }

    #[tokio::test]
    async fn test_domain_error_is_not_retried() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel);
        let attempts = AtomicU32::new(0);

        let err = executor
            .run_serialized(|_tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Err::<(), _>(AppError::domain("job rejected")) })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Domain(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_carries_last_conflict() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel).with_max_attempts(4);
        let attempts = AtomicU32::new(0);

        let err = executor
            .run_serialized(|tx| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move {
                    tx.enqueue("alerts", "never")?;
                    Err::<(), _>(AppError::transient_conflict(format!("conflict #{n}")))
                })
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            err.to_string(),
            "Could not commit serialized transaction after 4 attempts"
        );
        match err {
            AppError::RetryBudgetExhausted {
                attempts,
                last_conflict,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_conflict.to_string().contains("conflict #4"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(channel.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let store = InMemoryStore::new();
        let channel = RecordingPublisher::new();
        let executor = executor(&store, &channel).with_backoff(RetryConfig::new(
            3,
            Duration::from_millis(50),
            Duration::from_millis(200),
        ));

        let started = tokio::time::Instant::now();
        store.conflict_on_next_commits(2);

        executor
            .run_serialized(|_tx| Box::pin(async move { Ok(()) }))
            .await
            .unwrap();

        // 50ms + 100ms
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(store.stats().conflicts, 2);
        assert_eq!(store.stats().committed, 1);
    }
}
