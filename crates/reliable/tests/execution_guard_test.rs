//! Exactly-once behaviour of the execution guard across concurrent workers

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use relay_locks::LockManager;
use relay_locks_memory::MemoryLockManager;
use relay_reliable::{EventEnvelope, Execution, ExecutionGuard, GuardConfig, GuardError, StatusTracker};
use relay_store_memory::MemoryStore;
use serde_json::json;
use tokio::sync::Barrier;
use tracing_test::traced_test;

mod common;
use common::FlakyStore;

fn envelope(is_idempotent: bool) -> EventEnvelope {
    EventEnvelope::new("test", "producer", json!({ "name": "noop" }), is_idempotent)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_concurrent_duplicates_run_once() {
    let store = MemoryStore::new();
    let locks = MemoryLockManager::default();
    let envelope = envelope(false);
    let runs = Arc::new(AtomicUsize::new(0));

    // eight workers in "different processes" sharing one store and lock table
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let guard = ExecutionGuard::new(
                store.clone(),
                locks.sibling(format!("worker-{worker}")),
                GuardConfig::default(),
            );
            let envelope = envelope.clone();
            let runs = runs.clone();

            tokio::spawn(async move {
                guard
                    .execute(&envelope, async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, Infallible>(())
                    })
                    .await
            })
        })
        .collect();

    let mut executed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Execution::Executed(()) => executed += 1,
            Execution::AlreadyCompleted => {}
            Execution::ExecutedUnrecorded(()) => panic!("completion should be recorded"),
        }
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(executed, 1);

    let tracker = StatusTracker::new(store);
    assert!(tracker.is_completed(&envelope.status_key).await.unwrap());
}

#[tokio::test]
async fn test_sequential_duplicate_skipped_without_polling_task() {
    let guard = ExecutionGuard::new(
        MemoryStore::new(),
        MemoryLockManager::default(),
        GuardConfig::default(),
    );
    let envelope = envelope(false);

    let runs = AtomicUsize::new(0);
    let task = || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, Infallible>(())
    };

    let first = guard.execute(&envelope, task()).await;
    assert_matches!(first, Ok(Execution::Executed(())));

    let second = guard.execute(&envelope, task()).await;
    assert_matches!(second, Ok(Execution::AlreadyCompleted));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idempotent_duplicates_not_serialised() {
    let store = MemoryStore::new();
    let locks = MemoryLockManager::default();
    let envelope = envelope(true);

    // both tasks must be inside their critical section at once to pass
    let barrier = Arc::new(Barrier::new(2));

    let run = |locks: MemoryLockManager| {
        let guard = ExecutionGuard::new(store.clone(), locks, GuardConfig::default());
        let envelope = envelope.clone();
        let barrier = barrier.clone();

        tokio::spawn(async move {
            guard
                .execute(&envelope, async {
                    barrier.wait().await;
                    Ok::<_, Infallible>(())
                })
                .await
        })
    };

    let a = run(locks.sibling("a"));
    let b = run(locks.sibling("b"));

    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { (a.await, b.await) })
        .await
        .expect("idempotent executions blocked each other");

    assert!(a.unwrap().unwrap().ran());
    assert!(b.unwrap().unwrap().ran());
}

#[tokio::test(start_paused = true)]
async fn test_idempotent_ignores_held_lock() {
    let locks = MemoryLockManager::default();
    let guard = ExecutionGuard::new(MemoryStore::new(), locks.clone(), GuardConfig::default());
    let envelope = envelope(true);

    let _held = locks
        .sibling("other")
        .lock(&format!("lock:{}", envelope.status_key))
        .await
        .unwrap();

    let result = guard.execute(&envelope, async { Ok::<_, Infallible>(()) }).await;

    assert_matches!(result, Ok(Execution::Executed(())));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_lock_wait_bounded() {
    let locks = MemoryLockManager::default();
    let guard = ExecutionGuard::new(
        MemoryStore::new(),
        locks.clone(),
        GuardConfig {
            lock_wait: Duration::from_millis(50),
            ..GuardConfig::default()
        },
    );
    let envelope = envelope(false);

    let _held = locks
        .sibling("other")
        .lock(&format!("lock:{}", envelope.status_key))
        .await
        .unwrap();

    let result = guard
        .execute(&envelope, async { Ok::<_, Infallible>(()) })
        .await;

    assert_matches!(
        result,
        Err(GuardError::LockUnavailable { status_key, source: None }) if status_key == envelope.status_key
    );
    assert!(logs_contain("event lock still held by another worker"));
    assert!(logs_contain(r#"HeldByOther("other")"#));
}

#[tokio::test]
async fn test_failed_task_records_nothing() {
    let store = MemoryStore::new();
    let guard = ExecutionGuard::new(store.clone(), MemoryLockManager::default(), GuardConfig::default());
    let envelope = envelope(false);

    let failed = guard.execute(&envelope, async { Err::<(), _>("upstream down") }).await;
    assert_matches!(failed, Err(GuardError::Task("upstream down")));

    // the lock was released and the status left open, so a retry runs
    let retried = guard.execute(&envelope, async { Ok::<_, &str>(()) }).await;
    assert_matches!(retried, Ok(Execution::Executed(())));
}

#[tokio::test]
#[traced_test]
async fn test_unrecorded_completion_reported() {
    let store = FlakyStore::default();
    let guard = ExecutionGuard::new(store.clone(), MemoryLockManager::default(), GuardConfig::default());
    let envelope = envelope(false);

    store.fail_writes(true);
    let result = guard.execute(&envelope, async { Ok::<_, Infallible>(7) }).await;
    assert_matches!(result, Ok(Execution::ExecutedUnrecorded(7)));
    assert!(logs_contain("failed to record completion"));

    // nothing was recorded, so a duplicate runs again
    store.fail_writes(false);
    let again = guard.execute(&envelope, async { Ok::<_, Infallible>(8) }).await;
    assert_matches!(again, Ok(Execution::Executed(8)));
}

#[tokio::test]
async fn test_status_read_failure_skips_task() {
    let store = FlakyStore::default();
    let guard = ExecutionGuard::new(store.clone(), MemoryLockManager::default(), GuardConfig::default());
    let envelope = envelope(false);
    let runs = AtomicUsize::new(0);

    store.fail_reads(true);
    let result = guard
        .execute(&envelope, async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(())
        })
        .await;

    assert_matches!(result, Err(GuardError::Store(_)));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

