//! Cancellation-bearing context passed to phase runs.

use tokio::sync::watch;

/// Context a phase runs under.
///
/// Cancel a build through [`CancelHandle::cancel`] rather than by dropping
/// the phase future: a cancelled run kills its container and returns, so the
/// orchestrator still gets to clean it up.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: watch::Receiver<bool>,
}

/// Cancels every [`RunContext`] derived from the same `with_cancel` call.
#[derive(Debug)]
pub struct CancelHandle {
    cancel: watch::Sender<bool>,
}

impl RunContext {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (_, cancel) = watch::channel(false);
        Self { cancel }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, cancel) = watch::channel(false);
        (Self { cancel }, CancelHandle { cancel: tx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the context is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}
