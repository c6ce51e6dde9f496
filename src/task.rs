//! Cancellable units of async work.
//!
//! Cancellation is cooperative: a [`CancelSource`] raises a signal, consumers
//! observe it and tear down, but producers (timers, network requests) are not
//! forcibly halted — their late results are simply ignored by the generation
//! checks in the components that started them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Owning side of a cancellation signal. One per navigation generation or
/// fetcher attempt; cancelling it releases every task and subscription
/// created under that generation.
pub struct CancelSource {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Lightweight handle for sharing with spawned work.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of a [`CancelSource`].
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised. Returns immediately if it already was.
    pub async fn cancelled(&self) {
        // Subscribe to Notify BEFORE checking the flag to avoid TOCTOU race:
        // without this, cancel() could fire between the check and the await,
        // and notify_waiters() would have no subscribers, losing the signal.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// How a cancellable unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The work ran to completion and produced a value.
    Settled(T),
    /// The cancellation signal won the race; the value, if any arrives
    /// later, is discarded.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn settled(self) -> Option<T> {
        match self {
            TaskOutcome::Settled(value) => Some(value),
            TaskOutcome::Cancelled => None,
        }
    }
}

/// Drive `fut` to completion unless `cancel` fires first.
///
/// This is the single race every loader, action, and fetcher attempt in the
/// engine runs through; [`AsyncTask::spawn`] wraps it in its own task.
pub async fn run_cancellable<T, F>(fut: F, cancel: CancelHandle) -> TaskOutcome<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => TaskOutcome::Cancelled,
        value = fut => TaskOutcome::Settled(value),
    }
}

/// A spawned, cancellable unit of work wrapping a single loader or action
/// invocation.
pub struct AsyncTask<T> {
    id: Uuid,
    handle: JoinHandle<TaskOutcome<T>>,
}

impl<T: Send + 'static> AsyncTask<T> {
    /// Spawn `fut` racing against `cancel`.
    pub fn spawn<F>(fut: F, cancel: CancelHandle) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(run_cancellable(fut, cancel));
        Self {
            id: Uuid::new_v4(),
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the task to settle or be cancelled. A panic inside the
    /// wrapped work is reported as `Cancelled`: the engine has no crash
    /// path, the result is simply unusable.
    pub async fn join(self) -> TaskOutcome<T> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(task = %self.id, error = %err, "Task failed to join");
                TaskOutcome::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_wait_returns_immediately_if_already_signalled() {
        let source = CancelSource::new();
        let handle = source.handle();
        source.cancel();
        // Must not hang.
        tokio::time::timeout(Duration::from_millis(50), handle.cancelled())
            .await
            .expect("cancelled() should return immediately");
    }

    #[tokio::test]
    async fn signal_wakes_pending_waiter() {
        let source = CancelSource::new();
        let handle = source.handle();
        let waiter = tokio::spawn(async move { handle.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
    }

    #[tokio::test]
    async fn task_settles_with_value() {
        let source = CancelSource::new();
        let task = AsyncTask::spawn(async { 42 }, source.handle());
        assert_eq!(task.join().await, TaskOutcome::Settled(42));
    }

    #[tokio::test]
    async fn cancelled_task_discards_result() {
        let source = CancelSource::new();
        let task = AsyncTask::spawn(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                42
            },
            source.handle(),
        );
        source.cancel();
        assert_eq!(task.join().await, TaskOutcome::Cancelled);
    }

    #[tokio::test]
    async fn run_cancellable_prefers_completed_future() {
        let source = CancelSource::new();
        let outcome = run_cancellable(async { "done" }, source.handle()).await;
        assert_eq!(outcome.settled(), Some("done"));
    }
}
