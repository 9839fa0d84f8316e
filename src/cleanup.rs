//! Ordered teardown of state mutated around a command run.
//!
//! Actions run in reverse registration order. Every action runs even when an
//! earlier one failed, and every failure is returned. A stack dropped before
//! [`CleanupStack::run_all`] runs its pending actions on drop and logs the
//! failures instead.

use anyhow::Result;

use crate::errors::{CleanupError, JoinedError};

type CleanupAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// A stack of labelled cleanup actions.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, CleanupAction)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. It runs before every action registered earlier.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, last registered first, and collect the failures.
    ///
    /// Errors that are already a `CleanupError` are kept as-is; anything else
    /// is wrapped in `CleanupError::Action` so the label survives.
    pub fn run_all(mut self) -> JoinedError {
        self.unwind()
    }

    fn unwind(&mut self) -> JoinedError {
        let mut failures = JoinedError::new();
        for (label, action) in std::mem::take(&mut self.actions).into_iter().rev() {
            tracing::debug!(cleanup = %label, "Running cleanup action");
            if let Err(err) = action() {
                tracing::warn!(cleanup = %label, error = %format!("{:#}", err), "Cleanup action failed");
                if err.is::<CleanupError>() {
                    failures.push(err);
                } else {
                    failures.push(CleanupError::Action { label, source: err });
                }
            }
        }
        failures
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        tracing::warn!(pending = self.actions.len(), "Cleanup stack dropped; running pending actions");
        // Each failure was already logged by unwind().
        let _ = self.unwind();
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.actions.iter().map(|(l, _)| l.as_str()).collect();
        f.debug_struct("CleanupStack").field("actions", &labels).finish()
    }
}
