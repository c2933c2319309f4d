//! Run orchestration with tool loop execution.
//!
//! The orchestrator drives one run to its end:
//! 1. Read the run's event stream, dispatching each event to the UI
//! 2. When the run pauses on function calls, execute them all
//! 3. Submit the outputs and continue with the continuation stream
//! 4. Repeat until a stream ends without requesting tool outputs
//!
//! # Example
//!
//! ```rust,ignore
//! use sales_assistant::orchestrator::RunOrchestrator;
//!
//! let orchestrator = RunOrchestrator::new(runtime.clone(), tools);
//! let stream = runtime.start_run(&thread_id, &request).await?;
//! let outcome = orchestrator
//!     .drive(stream, sink, "Contoso Sales Assistant", &cancel)
//!     .await?;
//! ```

pub mod dispatcher;

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

pub use dispatcher::{Dispatch, EventDispatcher, MessageSurface, ToolSubmission};

use crate::assistant::{AgentRuntime, Run, RunEventStream, RunStatus};
use crate::error::TurnError;
use crate::presentation::PresentationSink;
use crate::tools::ToolRegistry;

/// Default cap on tool-output submissions per run.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// How a driven run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Last run object reported by the final stream.
    pub run: Option<Run>,
    /// Number of tool-output submissions made.
    pub tool_rounds: usize,
}

impl RunOutcome {
    pub fn status(&self) -> Option<RunStatus> {
        self.run.as_ref().map(|run| run.status)
    }
}

#[derive(Debug, Clone)]
pub struct RunOrchestrator {
    runtime: Arc<dyn AgentRuntime>,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: usize,
}

impl RunOrchestrator {
    pub fn new(runtime: Arc<dyn AgentRuntime>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            runtime,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    #[must_use]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Consume `stream` and every continuation it leads to.
    ///
    /// Each stream gets its own dispatcher; only the message surface opened
    /// for the continuation is carried across.
    ///
    /// Cancelling `cancel` closes the open surfaces and returns
    /// [`TurnError::Cancelled`]. A tool batch in progress finishes first.
    pub async fn drive(
        &self,
        stream: RunEventStream,
        sink: Arc<dyn PresentationSink>,
        author: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, TurnError> {
        let mut stream = stream;
        let mut rounds = 0;
        let mut carried = None;

        loop {
            let mut dispatcher = EventDispatcher::new(
                Arc::clone(&self.runtime),
                Arc::clone(&self.tools),
                Arc::clone(&sink),
                author,
            )
            .with_open_message(carried.take());

            let mut submission = None;
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => {
                        dispatcher.finish().await;
                        return Err(TurnError::Cancelled);
                    }
                    next = stream.next() => next,
                };
                let Some(event) = next else {
                    break;
                };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        dispatcher.finish().await;
                        return Err(TurnError::Stream(e));
                    }
                };
                if let Dispatch::Resume(s) = dispatcher.handle(event).await {
                    submission = Some(s);
                    break;
                }
            }

            let Some(submission) = submission else {
                dispatcher.finish().await;
                let run = dispatcher.into_current_run();
                tracing::info!(
                    run_id = run.as_ref().map_or("", |r| r.id.as_str()),
                    status = ?run.as_ref().map(|r| r.status),
                    tool_rounds = rounds,
                    "Run stream finished"
                );
                return Ok(RunOutcome {
                    run,
                    tool_rounds: rounds,
                });
            };

            if cancel.is_cancelled() {
                dispatcher.finish().await;
                return Err(TurnError::Cancelled);
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                dispatcher.finish().await;
                tracing::warn!(
                    run_id = %submission.run_id,
                    max_tool_rounds = self.max_tool_rounds,
                    "Run exceeded the tool round limit"
                );
                return Err(TurnError::ToolRoundLimit(self.max_tool_rounds));
            }
            tracing::info!(
                thread_id = %submission.thread_id,
                run_id = %submission.run_id,
                round = rounds,
                outputs = submission.outputs.len(),
                "Submitting tool outputs"
            );
            let submitted = tokio::select! {
                () = cancel.cancelled() => None,
                result = self.runtime.submit_tool_outputs(
                    &submission.thread_id,
                    &submission.run_id,
                    &submission.outputs,
                ) => Some(result),
            };
            let Some(submitted) = submitted else {
                dispatcher.finish().await;
                return Err(TurnError::Cancelled);
            };
            match submitted {
                Ok(next) => {
                    carried = dispatcher.take_open_message();
                    stream = next;
                }
                Err(e) => {
                    dispatcher.finish().await;
                    return Err(TurnError::Agent(e));
                }
            }
        }
    }
}
