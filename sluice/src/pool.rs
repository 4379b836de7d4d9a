use crate::error::ClientError;
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::{runtime::Handle, sync::Semaphore, task::JoinHandle};
use tracing::info;

/// Bounded executor shared by retry loops and cache loads.
///
/// Tasks are spawned on a tokio runtime and wait for one of `max_workers`
/// permits before running. After [`WorkerPool::shutdown`] new submissions
/// are rejected while tasks already submitted run to completion.
///
/// Clones share the same pool and compare equal.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_workers: usize,
    active: AtomicUsize,
    shutdown: AtomicBool,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(handle: Handle, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                handle,
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                active: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Pool on the runtime the caller is running in.
    pub fn current(max_workers: usize) -> Result<Self, ClientError> {
        let handle = Handle::try_current().map_err(|e| {
            ClientError::Configuration(format!("no tokio runtime available: {e}"))
        })?;
        Ok(Self::new(handle, max_workers))
    }

    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>, ClientError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(ClientError::Rejected);
        }

        let inner = Arc::clone(&self.inner);
        Ok(self.inner.handle.spawn(async move {
            // the semaphore is never closed, a failed acquire cannot happen
            let _permit = Arc::clone(&inner.permits).acquire_owned().await.ok();
            let _active = ActiveGuard::enter(&inner.active);
            task.await
        }))
    }

    /// Reject further submissions. Calling it again has no effect.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            info!(
                active = self.active_count(),
                "worker pool shut down, running tasks will finish"
            );
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Tasks currently holding a permit.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }
}

impl PartialEq for WorkerPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for WorkerPool {}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.inner.max_workers)
            .field("active", &self.active_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = WorkerPool::current(2).unwrap();
        let handle = pool.submit(async { 21 * 2 }).unwrap();
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(pool.max_workers(), 2);
    }

    #[tokio::test]
    async fn zero_workers_still_runs() {
        let pool = WorkerPool::current(0).unwrap();
        assert_eq!(pool.max_workers(), 1);
        assert_eq!(pool.submit(async { 1 }).unwrap().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::current(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = pool
            .submit(async move {
                let _ = release_rx.await;
            })
            .unwrap();
        let second = pool.submit(async { "second" }).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 1);
        assert!(!second.is_finished());

        release_tx.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(second.await.unwrap(), "second");
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_but_finishes_queued() {
        let pool = WorkerPool::current(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let running = pool
            .submit(async move {
                let _ = release_rx.await;
                "done"
            })
            .unwrap();

        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.submit(async {}).unwrap_err(), ClientError::Rejected);

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap(), "done");
    }

    #[test]
    fn current_without_runtime_fails() {
        assert!(matches!(
            WorkerPool::current(4),
            Err(ClientError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn clones_are_equal() {
        let pool = WorkerPool::current(4).unwrap();
        let other = WorkerPool::current(4).unwrap();
        assert_eq!(pool, pool.clone());
        assert_ne!(pool, other);
    }
}
