//! Background work
//!
//! - **tasks**: the tree mutation workers (import, delete, move, rename)
//! - **BackgroundTasks**: detached task set owned by the service; requests
//!   return before the work they enqueue has finished

pub mod tasks;

pub use tasks::{DeleteJob, FileOperationTasks, ImportJob, MoveJob, RenameJob};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// Detached tasks spawned on behalf of requests
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` without waiting for it
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().await;
        while let Some(result) = set.try_join_next() {
            log_finished(result);
        }
        set.spawn(task);
        debug!(task = name, running = set.len(), "Background task spawned");
    }

    /// Number of tasks not yet reaped
    pub async fn len(&self) -> usize {
        self.set.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until every spawned task, including ones spawned meanwhile, has finished
    pub async fn wait_idle(&self) {
        loop {
            let mut drained = std::mem::take(&mut *self.set.lock().await);
            if drained.is_empty() {
                return;
            }
            while let Some(result) = drained.join_next().await {
                log_finished(result);
            }
        }
    }
}

fn log_finished(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Background task panicked: {}", e);
        } else {
            debug!("Background task cancelled: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_drains_tasks_spawned_meanwhile() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks
            .spawn("outer", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let d = inner_done.clone();
                inner_tasks
                    .spawn("inner", async move {
                        d.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
                inner_done.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        tasks.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_set() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("boom", async { panic!("boom") }).await;
        tasks.wait_idle().await;
        tasks.spawn("ok", async {}).await;
        tasks.wait_idle().await;
        assert!(tasks.is_empty().await);
    }
}
