//! # pmopool
//!
//! Bounded pool of persistent codec-engine workers.
//!
//! Native codec work (decode, encode, filtering) must never run with
//! unbounded concurrency: each engine instance is expensive to start and
//! hungry while running. This crate provides a fixed-capacity pool of
//! execution slots, each bound to **one persistent engine instance** that is
//! lazily created on first use and reused for every task ever assigned to
//! that slot.
//!
//! ## Contract
//!
//! - [`WorkerPool::enqueue`] suspends until a slot is free (FIFO wake
//!   order), assigns the first idle slot by linear scan, starts the job and
//!   returns a [`TaskHandle`]. Dropping the handle is fire-and-forget;
//!   awaiting [`TaskHandle::wait`] suspends until completion and propagates
//!   the task's failure ("enqueue sync" semantics).
//! - [`WorkerPool::flush`] is a barrier: it returns only once the queue is
//!   empty and every in-flight task has completed.
//! - A failure whose handle was dropped is never silently lost: it is
//!   logged and forwarded to the receiver returned by
//!   [`WorkerPool::take_error_events`].
//!
//! All tasks are assumed homogeneous in cost, so no priority handling is
//! needed; slot waiters are woken in FIFO order.
//!
//! ## Example
//!
//! ```no_run
//! use futures::FutureExt;
//! use pmopool::WorkerPool;
//!
//! struct Engine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(4, || Engine);
//!     let handle = pool
//!         .enqueue(|_engine| async move { Ok(42u32) }.boxed())
//!         .await;
//!     assert_eq!(handle.wait().await.unwrap(), 42);
//!     pool.flush().await;
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify, Semaphore};

/// Lower bound on the derived pool capacity.
pub const MIN_WORKERS: usize = 2;

#[derive(thiserror::Error, Debug, Clone)]
pub enum PoolError {
    #[error("codec task failed: {0}")]
    Task(String),
    #[error("{role} task aborted: {details}")]
    TaskJoin { role: &'static str, details: String },
}

/// A unit of work enqueued on the pool: the job receives the slot's
/// persistent engine and resolves to a value or a [`PoolError`].
pub type PoolJob<E, T> = Box<dyn FnOnce(Arc<E>) -> BoxFuture<'static, Result<T, PoolError>> + Send>;

struct PoolInner<E> {
    slots: Vec<Arc<AsyncMutex<Option<Arc<E>>>>>,
    semaphore: Arc<Semaphore>,
    factory: Box<dyn Fn() -> E + Send + Sync>,
    pending: AtomicUsize,
    idle: Notify,
    error_tx: mpsc::UnboundedSender<PoolError>,
    error_rx: StdMutex<Option<mpsc::UnboundedReceiver<PoolError>>>,
}

/// Fixed-capacity pool of codec workers. Cheap to clone (shared handle).
pub struct WorkerPool<E> {
    inner: Arc<PoolInner<E>>,
}

impl<E> Clone for WorkerPool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Observable completion of an enqueued task.
///
/// Await [`wait`](Self::wait) for synchronous semantics; drop the handle for
/// fire-and-forget. A failure observed after the handle was dropped goes to
/// the pool's error-event channel instead of vanishing.
pub struct TaskHandle<T> {
    done: Option<oneshot::Receiver<Result<T, PoolError>>>,
    error_tx: mpsc::UnboundedSender<PoolError>,
}

impl<T> TaskHandle<T> {
    /// Suspends until the task completes, propagating its failure.
    pub async fn wait(mut self) -> Result<T, PoolError> {
        let rx = self
            .done
            .take()
            .expect("task handle completion channel already consumed");
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::TaskJoin {
                role: "pool-worker",
                details: "worker dropped its completion channel".into(),
            }),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        let Some(mut rx) = self.done.take() else {
            return;
        };
        // Already-completed failures would otherwise sit unread in the
        // oneshot; forward them. A still-running task sees the closed
        // receiver and reports through the worker side.
        if let Ok(Err(err)) = rx.try_recv() {
            tracing::error!(error = %err, "fire-and-forget codec task failed");
            let _ = self.error_tx.send(err);
        }
    }
}

/// Counts one queued-or-running job; decrementing on drop keeps the count
/// correct even if the `enqueue` call is cancelled before the spawn.
struct PendingGuard<E> {
    inner: Arc<PoolInner<E>>,
}

impl<E> PendingGuard<E> {
    fn new(inner: Arc<PoolInner<E>>) -> Self {
        inner.pending.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl<E> Drop for PendingGuard<E> {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl<E: Send + Sync + 'static> WorkerPool<E> {
    /// Creates a pool of `capacity` slots (at least 1), each lazily binding
    /// one engine built by `factory`.
    pub fn new(capacity: usize, factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        let capacity = capacity.max(1);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let inner = PoolInner {
            slots: (0..capacity)
                .map(|_| Arc::new(AsyncMutex::new(None)))
                .collect(),
            semaphore: Arc::new(Semaphore::new(capacity)),
            factory: Box::new(factory),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            error_tx,
            error_rx: StdMutex::new(Some(error_rx)),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Pool sized from the host core count, bounded below by
    /// [`MIN_WORKERS`].
    pub fn with_default_capacity(factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self::new(Self::default_capacity(), factory)
    }

    pub fn default_capacity() -> usize {
        num_cpus::get().max(MIN_WORKERS)
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Enqueues a job. Suspends until a slot is free (FIFO), then starts the
    /// job on that slot and returns its completion handle.
    pub async fn enqueue<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<E>) -> BoxFuture<'static, Result<T, PoolError>> + Send + 'static,
    {
        let pending = PendingGuard::new(Arc::clone(&self.inner));
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed");

        // First idle slot, linear scan. Finishing tasks release their slot
        // before their permit, so a fresh permit holder finds one; the yield
        // covers the short window where two holders race for the same slot.
        let (slot_index, mut slot) = loop {
            let claimed = self.inner.slots.iter().enumerate().find_map(|(i, s)| {
                Arc::clone(s).try_lock_owned().ok().map(|guard| (i, guard))
            });
            match claimed {
                Some(found) => break found,
                None => tokio::task::yield_now().await,
            }
        };

        if slot.is_none() {
            tracing::debug!(slot = slot_index, "starting persistent codec engine");
            *slot = Some(Arc::new((self.inner.factory)()));
        }
        let engine = Arc::clone(slot.as_ref().expect("slot engine just initialized"));

        let (done_tx, done_rx) = oneshot::channel();
        let future = job(engine);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _pending = pending;
            let result = future.await;
            // Slot first, permit second: the next waiter must find an idle
            // slot once its permit clears.
            drop(slot);
            drop(permit);
            if let Err(unread) = done_tx.send(result) {
                if let Err(err) = unread {
                    tracing::error!(error = %err, "fire-and-forget codec task failed");
                    let _ = inner.error_tx.send(err);
                }
            }
        });

        TaskHandle {
            done: Some(done_rx),
            error_tx: self.inner.error_tx.clone(),
        }
    }

    /// Enqueues a job and suspends until it completes, propagating its
    /// failure to the caller.
    pub async fn enqueue_sync<T, F>(&self, job: F) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<E>) -> BoxFuture<'static, Result<T, PoolError>> + Send + 'static,
    {
        self.enqueue(job).await.wait().await
    }

    /// Barrier: suspends until the queue is empty and all in-flight tasks
    /// have completed.
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Takes the error-event receiver carrying failures of fire-and-forget
    /// tasks. Returns `None` after the first call.
    pub fn take_error_events(&self) -> Option<mpsc::UnboundedReceiver<PoolError>> {
        self.inner
            .error_rx
            .lock()
            .expect("error receiver mutex poisoned")
            .take()
    }
}
