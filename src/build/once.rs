//! At-most-once gate shared by the phases of one build.

use std::future::Future;

use tokio::sync::OnceCell;

use crate::error::PhaseError;

/// Runs a setup step at most once and hands every caller its outcome.
///
/// A failure is memoized like a success: later callers observe the same
/// error instead of retrying.
#[derive(Debug, Default)]
pub struct SharedOnce {
    outcome: OnceCell<Result<(), String>>,
}

impl SharedOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `step` if no caller has yet, then returns the shared outcome.
    pub async fn call<F, Fut>(&self, step: F) -> Result<(), PhaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PhaseError>>,
    {
        let outcome = self
            .outcome
            .get_or_init(|| async move { step().await.map_err(|e| e.to_string()) })
            .await;

        outcome.clone().map_err(PhaseError::AppPreparation)
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.initialized()
    }
}
