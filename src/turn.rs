//! Turn driver: one user message in, one streamed assistant response out.
//!
//! A turn makes sure the assistant is configured, binds the session to its
//! thread, uploads attachments, appends the user message, and drives the
//! run. A turn that does not complete (error or user stop) cancels whatever
//! runs it left active, so the thread accepts the next message.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::assistant::init::{AssistantHandle, AssistantState};
use crate::assistant::{AgentRuntime, Attachment, MessageRole, RunRequest, RunStatus};
use crate::error::TurnError;
use crate::orchestrator::RunOrchestrator;
use crate::presentation::{PresentationEvent, PresentationSink, surface_id};
use crate::session::{Session, ThreadLifecycle};

pub const NOT_INITIALIZED_MESSAGE: &str = "An error occurred initializing the assistant.";
pub const THREAD_FAILED_MESSAGE: &str = "A thread was not successfully created.";
pub const RETRY_MESSAGE: &str = "Please try again in a moment.";

/// A file the user attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMessage {
    pub content: String,
    pub uploads: Vec<Upload>,
}

impl UserMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            uploads: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub temperature: f32,
    /// Pause after uploading attachments so they become searchable.
    pub upload_settle: Duration,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            upload_settle: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnDriver {
    runtime: Arc<dyn AgentRuntime>,
    assistant: Arc<AssistantState>,
    lifecycle: ThreadLifecycle,
    orchestrator: RunOrchestrator,
    settings: TurnSettings,
}

impl TurnDriver {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        assistant: Arc<AssistantState>,
        lifecycle: ThreadLifecycle,
        orchestrator: RunOrchestrator,
        settings: TurnSettings,
    ) -> Self {
        Self {
            runtime,
            assistant,
            lifecycle,
            orchestrator,
            settings,
        }
    }

    pub fn assistant(&self) -> &AssistantState {
        &self.assistant
    }

    /// Handle one user message.
    ///
    /// Never returns an error: failures are shown to the user and logged.
    /// Cancelling `cancel` stops the turn; open surfaces are closed and run
    /// cleanup still happens before this returns.
    ///
    /// Turns on one session run one at a time. A turn waits for the
    /// previous one, its run cleanup included, before touching the thread.
    #[tracing::instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn handle_message(
        &self,
        session: &Session,
        message: UserMessage,
        sink: Arc<dyn PresentationSink>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let _gate = session.lock_turn().await;
        if cancel.is_cancelled() {
            tracing::info!("Turn superseded before it started");
            return TurnOutcome::Cancelled;
        }

        let assistant = match self.assistant.initialize().await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %TurnError::NotReady(e), "Assistant not initialized");
                notify(sink.as_ref(), NOT_INITIALIZED_MESSAGE).await;
                return TurnOutcome::Failed;
            }
        };

        let thread_id = match self.lifecycle.get_or_create_thread_id(session).await {
            Ok(thread_id) => thread_id,
            Err(e) => {
                tracing::error!(error = %TurnError::Thread(e), "Thread not successfully created");
                notify(sink.as_ref(), THREAD_FAILED_MESSAGE).await;
                return TurnOutcome::Failed;
            }
        };

        let result = self
            .run_turn(&assistant, &thread_id, message, &sink, &cancel)
            .await;

        let outcome = match result {
            Ok(()) => return TurnOutcome::Completed,
            Err(TurnError::Cancelled) => {
                tracing::info!(thread_id = %thread_id, "Turn stopped by the user");
                TurnOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "An error calling the assistant occurred");
                notify(sink.as_ref(), &format!("An error occurred: {e}")).await;
                notify(sink.as_ref(), RETRY_MESSAGE).await;
                TurnOutcome::Failed
            }
        };

        let cancelled = self.lifecycle.cancel_all_active_runs(&thread_id).await;
        tracing::debug!(thread_id = %thread_id, cancelled, "Run cleanup finished");
        outcome
    }

    async fn run_turn(
        &self,
        assistant: &AssistantHandle,
        thread_id: &str,
        message: UserMessage,
        sink: &Arc<dyn PresentationSink>,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let start = async {
            let attachments = self.upload_attachments(message.uploads, sink.as_ref()).await?;

            self.runtime
                .create_message(thread_id, MessageRole::User, &message.content, &attachments)
                .await
                .map_err(TurnError::Agent)?;

            let request = RunRequest {
                assistant_id: assistant.id.clone(),
                temperature: self.settings.temperature,
            };
            self.runtime
                .start_run(thread_id, &request)
                .await
                .map_err(TurnError::Agent)
        };

        // Nothing is on screen yet, so stopping here needs no surface cleanup.
        let stream = tokio::select! {
            () = cancel.cancelled() => return Err(TurnError::Cancelled),
            stream = start => stream?,
        };

        let outcome = self
            .orchestrator
            .drive(stream, Arc::clone(sink), &assistant.name, cancel)
            .await?;

        match &outcome.run {
            Some(run) if matches!(run.status, RunStatus::Completed | RunStatus::Cancelled) => Ok(()),
            Some(run) => Err(TurnError::RunFailed {
                status: run.status,
                message: run
                    .last_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            }),
            None => Err(TurnError::Unfinished),
        }
    }

    async fn upload_attachments(
        &self,
        uploads: Vec<Upload>,
        sink: &dyn PresentationSink,
    ) -> Result<Vec<Attachment>, TurnError> {
        if uploads.is_empty() {
            return Ok(Vec::new());
        }

        notify(sink, "Uploading files.").await;
        let mut attachments = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let file_id = self
                .runtime
                .upload_file(&upload.name, upload.bytes)
                .await
                .map_err(TurnError::Agent)?;
            attachments.push(Attachment::file_search(file_id));
        }

        if !self.settings.upload_settle.is_zero() {
            tokio::time::sleep(self.settings.upload_settle).await;
        }
        notify(sink, "Uploading completed.").await;
        Ok(attachments)
    }
}

async fn notify(sink: &dyn PresentationSink, content: &str) {
    sink.send(PresentationEvent::Message {
        id: surface_id(),
        author: None,
        content: content.to_string(),
    })
    .await;
}
