//! Cancellation and deadlines for registry work
//!
//! A [`Context`] is handed to every manager and resolver call. Fetches are
//! raced against it, so cancelling (or hitting the deadline) surfaces as
//! [`RepoError::Cancelled`] / [`RepoError::DeadlineExceeded`] instead of
//! waiting on the network.

use futures::future;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{RepoError, Result};

#[derive(Debug, Clone, Default)]
pub struct Context {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every context derived from it
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context that is also cancelled by the returned handle
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, CancelHandle { tx: Arc::new(tx) })
    }

    /// Child context with a deadline `timeout` from now, or the parent's if sooner
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error this context is done with, if it is done
    pub fn err(&self) -> Option<RepoError> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(RepoError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RepoError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> RepoError {
        let cancelled = async {
            if self.signals.is_empty() {
                future::pending::<()>().await;
            }
            let waits = self
                .signals
                .iter()
                .cloned()
                .map(|rx| Box::pin(wait_cancelled(rx)));
            future::select_all(waits).await;
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => RepoError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => RepoError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                RepoError::Cancelled
            }
        }
    }

    /// Run `fut` unless the context finishes first
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        let cancelled = *rx.borrow_and_update();
        if cancelled {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without cancelling: never fires
            future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        let value = ctx.run(async { Ok::<_, RepoError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_work() {
        let (ctx, handle) = Context::background().with_cancel();
        let task = tokio::spawn(async move {
            ctx.run(future::pending::<Result<()>>()).await
        });
        handle.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(RepoError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_context_fails_fast() {
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();
        assert!(matches!(ctx.err(), Some(RepoError::Cancelled)));
        let result = ctx.run(async { Ok::<_, RepoError>(()) }).await;
        assert!(matches!(result, Err(RepoError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let (parent, handle) = Context::background().with_cancel();
        let child = parent.with_timeout(Duration::from_secs(3600));
        handle.cancel();
        assert!(matches!(child.err(), Some(RepoError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let result = ctx.run(future::pending::<Result<()>>()).await;
        assert!(matches!(result, Err(RepoError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sooner_parent_deadline_wins() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = Context::background().with_cancel();
        drop(handle);
        let result = ctx
            .with_timeout(Duration::from_millis(20))
            .run(future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(RepoError::DeadlineExceeded)));
    }
}
