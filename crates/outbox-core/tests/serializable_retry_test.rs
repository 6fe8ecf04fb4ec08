//! 串行化重试执行器测试

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use relay_errors::{AppError, ErrorKind};
use relay_outbox_core::memory::{InMemoryStore, RecordingPublisher};
use relay_outbox_core::{Lifecycle, Publisher, SerializableRetryExecutor};

fn executor(
    store: &InMemoryStore,
    channel: &RecordingPublisher,
) -> SerializableRetryExecutor<InMemoryStore> {
    let lifecycle = Lifecycle::new(Publisher::new(Arc::new(channel.clone())));
    SerializableRetryExecutor::new(Arc::new(store.clone()), Arc::new(lifecycle))
}

#[tokio::test]
async fn test_succeeds_after_k_conflicts() {
    let store = InMemoryStore::new();
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);

    for k in [0u32, 1, 5, 99] {
        let calls = AtomicU32::new(0);

        let result = executor
            .run_serialized(|tx| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Box::pin(async move {
                    tx.enqueue("alerts", format!("k{k}:call{call}"))?;
                    if call <= k {
                        return Err(AppError::transient_conflict("could not serialize access"));
                    }
                    Ok(call)
                })
            })
            .await
            .unwrap();

        assert_eq!(result, k + 1);
        assert_eq!(calls.load(Ordering::SeqCst), k + 1);
    }

    // 每轮只发布成功那次尝试的消息
    let payloads: Vec<String> = channel
        .published()
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec!["k0:call1", "k1:call2", "k5:call6", "k99:call100"]);
}

#[tokio::test]
async fn test_always_conflicting_exhausts_after_max_attempts() {
    let store = InMemoryStore::new();
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);
    let calls = AtomicU32::new(0);

    let err = executor
        .run_serialized(|_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err::<(), _>(AppError::transient_conflict("40001")) })
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 100);
    assert_eq!(err.kind(), ErrorKind::RetryBudgetExhausted);
    assert_eq!(
        err.to_string(),
        "Could not commit serialized transaction after 100 attempts"
    );
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(store.checked_out(), 0);
}

#[tokio::test]
async fn test_domain_error_runs_once_and_rolls_back() {
    let store = InMemoryStore::new();
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);
    let calls = AtomicU32::new(0);

    let err = executor
        .run_serialized(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tx.store()?.put("job:42", "done")?;
                tx.enqueue("alerts", "job:42:done")?;
                Err::<(), _>(AppError::domain("job rejected"))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Domain(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("job:42"), None);
    assert_eq!(store.stats().rolled_back, 1);
    assert!(channel.published().is_empty());
}

#[tokio::test]
async fn test_resource_error_is_not_retried() {
    let store = InMemoryStore::new();
    store.fail_next_begin();
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);
    let calls = AtomicU32::new(0);

    let err = executor
        .run_serialized(|_tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(()) })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_commit_time_conflicts_are_retried() {
    let store = InMemoryStore::new();
    store.conflict_on_next_commits(3);
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);
    let calls = AtomicU32::new(0);

    executor
        .run_serialized(|tx| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { tx.enqueue("alerts", format!("call{call}")) })
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        channel.published_pairs(),
        vec![("alerts".to_string(), "call4".to_string())]
    );
    assert_eq!(store.stats().conflicts, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_lose_no_update() {
    const WORKERS: u64 = 8;

    let store = InMemoryStore::new();
    store.seed("counter", "0");
    let channel = RecordingPublisher::new();
    let executor = executor(&store, &channel);

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            executor
                .run_serialized(move |tx| {
                    Box::pin(async move {
                        let current = tx
                            .store()?
                            .get("counter")
                            .unwrap_or_else(|| "0".to_string())
                            .parse::<u64>()
                            .map_err(|e| AppError::domain(e.to_string()))?;
                        tokio::task::yield_now().await;
                        tx.store()?.put("counter", (current + 1).to_string())?;
                        tx.enqueue("counters", format!("worker:{worker}"))
                    })
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.get("counter"), Some(WORKERS.to_string()));
    assert_eq!(channel.published().len(), WORKERS as usize);
    assert_eq!(store.stats().committed, WORKERS);
    assert_eq!(store.checked_out(), 0);
}
