//! Owned handles over background timer tasks.

use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned timer task with a single owner.
///
/// The task is aborted when the handle is cancelled or dropped, so a timer
/// can never outlive the component that armed it.
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawn `task` on the current runtime.
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(timer = name, "timer started");
        Self {
            name,
            handle: tokio::spawn(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has run to completion or been aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::debug!(timer = self.name, "timer cancelled");
        }
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_timer(count: Arc<AtomicU32>) -> TimerHandle {
        TimerHandle::spawn("counter", async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_task() {
        let count = Arc::new(AtomicU32::new(0));
        let timer = counting_timer(Arc::clone(&count));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_task() {
        let count = Arc::new(AtomicU32::new(0));
        {
            let _timer = counting_timer(Arc::clone(&count));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
