//! Thread creation and run cleanup.

use std::sync::Arc;
use std::time::Duration;

use super::Session;
use crate::assistant::AgentRuntime;

/// Wait before cleaning up runs, so the runtime can settle runs that are
/// already finishing.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ThreadLifecycle {
    runtime: Arc<dyn AgentRuntime>,
    grace: Duration,
}

impl ThreadLifecycle {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            grace: DEFAULT_CANCEL_GRACE,
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Return the session's thread, creating it on first use.
    ///
    /// A failed creation leaves nothing cached, so the next message retries.
    pub async fn get_or_create_thread_id(&self, session: &Session) -> anyhow::Result<String> {
        let mut slot = session.thread_slot().lock().await;
        if let Some(thread_id) = slot.as_ref() {
            return Ok(thread_id.clone());
        }

        let thread_id = self.runtime.create_thread().await?;
        tracing::info!(session_id = %session.id(), thread_id = %thread_id, "Bound session to thread");
        *slot = Some(thread_id.clone());
        Ok(thread_id)
    }

    /// Cancel every run on the thread that has not reached a terminal status.
    ///
    /// Best effort: listing or cancellation failures are logged and skipped.
    /// Returns the number of runs cancelled.
    pub async fn cancel_all_active_runs(&self, thread_id: &str) -> usize {
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        let runs = match self.runtime.list_runs(thread_id).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Could not list runs for cleanup");
                return 0;
            }
        };

        let mut cancelled = 0;
        for run in runs.iter().filter(|run| !run.status.is_terminal()) {
            match self.runtime.cancel_run(thread_id, &run.id).await {
                Ok(()) => {
                    cancelled += 1;
                    tracing::info!(thread_id = %thread_id, run_id = %run.id, status = ?run.status, "Cancelled run");
                }
                Err(e) => {
                    tracing::debug!(
                        thread_id = %thread_id,
                        run_id = %run.id,
                        error = %e,
                        "Run cancellation failed; it likely finished on its own"
                    );
                }
            }
        }
        cancelled
    }
}
