use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use pmopool::{PoolError, WorkerPool};

struct TestEngine {
    id: usize,
}

fn counting_factory() -> (Arc<AtomicUsize>, impl Fn() -> TestEngine + Send + Sync + 'static) {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let factory = move || TestEngine {
        id: counter.fetch_add(1, Ordering::SeqCst),
    };
    (built, factory)
}

#[tokio::test]
async fn test_concurrency_never_exceeds_capacity() {
    let (_built, factory) = counting_factory();
    let pool = WorkerPool::new(3, factory);

    let running = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let running = Arc::clone(&running);
        let high_water = Arc::clone(&high_water);
        let completed = Arc::clone(&completed);
        let _handle = pool
            .enqueue(move |_engine| {
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .await;
    }

    pool.flush().await;
    assert_eq!(completed.load(Ordering::SeqCst), 6);
    assert!(high_water.load(Ordering::SeqCst) <= 3);
    assert!(running.load(Ordering::SeqCst) == 0);
}

#[tokio::test]
async fn test_flush_with_idle_pool_returns_immediately() {
    let (_built, factory) = counting_factory();
    let pool = WorkerPool::new(2, factory);
    pool.flush().await;
}

#[tokio::test]
async fn test_engines_are_persistent_and_lazy() {
    let (built, factory) = counting_factory();
    let pool = WorkerPool::new(2, factory);
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let mut seen = Vec::new();
    for _ in 0..8 {
        let id = pool
            .enqueue_sync(|engine: Arc<TestEngine>| async move { Ok(engine.id) }.boxed())
            .await
            .unwrap();
        seen.push(id);
    }

    // No more engines than slots, and every task reused one of them.
    assert!(built.load(Ordering::SeqCst) <= 2);
    assert!(seen.iter().all(|id| *id < 2));
}

#[tokio::test]
async fn test_enqueue_sync_propagates_failure() {
    let (_built, factory) = counting_factory();
    let pool = WorkerPool::new(2, factory);
    let mut errors = pool.take_error_events().unwrap();

    let result = pool
        .enqueue_sync(|_engine: Arc<TestEngine>| {
            async move { Err::<(), _>(PoolError::Task("bad frame".into())) }.boxed()
        })
        .await;
    assert!(matches!(result, Err(PoolError::Task(msg)) if msg == "bad frame"));

    // The awaited failure must not also land on the side channel.
    pool.flush().await;
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_dropped_handle_failure_reaches_error_channel() {
    let (_built, factory) = counting_factory();
    let pool = WorkerPool::new(2, factory);
    let mut errors = pool.take_error_events().unwrap();
    assert!(pool.take_error_events().is_none());

    let handle = pool
        .enqueue(|_engine: Arc<TestEngine>| {
            async move { Err::<(), _>(PoolError::Task("lost encode".into())) }.boxed()
        })
        .await;
    drop(handle);

    pool.flush().await;
    let err = errors.recv().await.unwrap();
    assert!(matches!(err, PoolError::Task(msg) if msg == "lost encode"));
}

#[tokio::test]
async fn test_flush_waits_for_completion() {
    let (_built, factory) = counting_factory();
    let pool = WorkerPool::new(2, factory);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let done = Arc::clone(&done);
        let _ = pool
            .enqueue(move |_engine| {
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .await;
    }

    pool.flush().await;
    assert_eq!(done.load(Ordering::SeqCst), 4);
}
