//! Bounded background task dispatch.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Inner {
    permits: Semaphore,
    pending: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count even if the task panics.
struct PendingGuard(Arc<Inner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs background steps with a cap on how many execute at once.
///
/// Dispatch never blocks the caller: tasks wait for a slot inside their own
/// spawned future.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl TaskRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new(max_concurrent.max(1)),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Spawn `task` once a slot is free.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let Ok(_permit) = guard.0.permits.acquire().await else {
                warn!(task = name, "Task runner closed, dropping task");
                return;
            };
            debug!(task = name, "Running background task");
            task.await;
        });
    }

    /// Spawn `task` right away, outside the concurrency cap, and hand back
    /// its handle.
    ///
    /// For steps a caller awaits: dropping the handle detaches the task
    /// rather than cancelling it, and `wait_idle` still covers it.
    pub fn spawn_tracked<F, T>(&self, name: &'static str, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let _guard = guard;
            debug!(task = name, "Running tracked task");
            task.await
        })
    }

    /// Tasks spawned and not yet finished, running or queued.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every spawned task has finished, up to `timeout`. Returns
    /// whether the runner went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}
