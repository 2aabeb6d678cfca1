//! Extend-lifetime contract.
//!
//! A handler may hand work to the event with `wait_until`; the host must
//! keep the worker alive until `settle` returns, even though the handler
//! itself (and any response) finished earlier.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Background work attached to one event.
#[derive(Debug)]
pub struct ExtendableEvent {
    label: &'static str,
    tasks: Mutex<JoinSet<()>>,
}

impl ExtendableEvent {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Event name for logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Keep the worker alive until `work` finishes. Must be called from
    /// within a tokio runtime.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(work);
    }

    /// Number of tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every extension. Returns how many ran to completion.
    pub async fn settle(self) -> usize {
        let mut tasks = self
            .tasks
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut completed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => completed += 1,
                Err(e) => warn!(event = self.label, error = %e, "Extended task aborted"),
            }
        }
        debug!(event = self.label, completed, "Event settled");
        completed
    }
}
