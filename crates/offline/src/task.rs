//! Cancelable background tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Owner of a spawned background loop.
///
/// `shutdown()` signals the loop and waits for it; dropping the handle aborts
/// the task instead.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `body`, handing it the shutdown signal to `select!` on.
    pub(crate) fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(body(shutdown.clone()));
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        // notify_one stores a permit, so a loop that is busy right now still
        // sees the signal on its next select.
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                tracing::warn!(task = self.name, error = %err, "background task ended abnormally");
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_waits_for_the_loop_to_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();

        let handle = TaskHandle::spawn("test", move |stop| async move {
            stop.notified().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(handle.name(), "test");

        handle.shutdown().await;
        assert!(exited.load(Ordering::SeqCst));
    }
}
