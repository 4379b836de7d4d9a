use std::{
    sync::{Mutex, PoisonError, Weak},
    time::Duration,
};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, trace};

/// Periodic cleanup hook driven by [`Maintenance`].
pub(crate) trait Sweep: Send + Sync {
    /// Drop expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// Background task sweeping a cache on a fixed period.
///
/// The task holds only a weak reference, so it also ends on its own once the
/// cache is dropped.
pub(crate) struct Maintenance {
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Maintenance {
    pub fn spawn(handle: &Handle, target: Weak<dyn Sweep>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let Some(target) = target.upgrade() else {
                            break;
                        };
                        let removed = target.sweep();
                        if removed > 0 {
                            trace!(removed, "cache sweep removed entries");
                        }
                    }
                }
            }

            debug!("cache maintenance stopped");
        });

        Self {
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the task. Returns `false` when it was already stopped.
    pub fn shutdown(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                let _ = self.stop.send(true);
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
