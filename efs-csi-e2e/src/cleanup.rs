//! Best-effort cleanup of per-test-case cluster objects.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::{CleanupFailure, ClusterError};

type CleanupAction = Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>;

/// Ordered cleanup actions registered as resources are created.
///
/// [`run`](Self::run) executes them newest first. A failing action is logged
/// and collected, and the remaining actions still run. Actions are lazy: an
/// action that is never run has no effect.
#[must_use = "registered cleanups only run when `run` is awaited"]
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, CleanupAction)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, operation: impl Into<String>, action: F)
    where
        F: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        self.actions.push((operation.into(), Box::pin(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action in reverse registration order and return the failures.
    pub async fn run(mut self) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();
        while let Some((operation, action)) = self.actions.pop() {
            match action.await {
                Ok(()) => debug!(operation = %operation, "cleanup done"),
                Err(source) => {
                    warn!(operation = %operation, error = %source, "cleanup failed");
                    failures.push(CleanupFailure { operation, source });
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|(operation, _)| operation))
            .finish()
    }
}
