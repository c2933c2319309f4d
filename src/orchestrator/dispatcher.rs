//! Routes run events to presentation surfaces and executes function tools.
//!
//! One [`EventDispatcher`] handles one event stream: the initial run stream,
//! or a continuation after tool outputs were submitted. It owns the surfaces
//! opened while handling that stream. A message surface that was opened for
//! the continuation can be carried over with [`EventDispatcher::take_open_message`].

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::assistant::{
    AgentRuntime, Annotation, FileRef, Run, RunEvent, RunStatus, TextContent, ToolCall,
    ToolCallKind, ToolOutput,
};
use crate::assistant::events::ToolCallDelta;
use crate::presentation::{
    FilterOutput, PresentationEvent, PresentationFilter, PresentationSink, surface_id,
};
use crate::tools::{ToolInvocation, ToolRegistry};

/// Tool outputs ready to resume a paused run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSubmission {
    pub thread_id: String,
    pub run_id: String,
    pub outputs: Vec<ToolOutput>,
}

/// What the driver should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// Stop reading this stream and resume the run with these outputs.
    Resume(ToolSubmission),
}

/// An open message surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSurface {
    pub id: String,
    has_content: bool,
}

#[derive(Debug, Clone)]
struct StepSurface {
    id: String,
    tool_call_id: String,
}

#[derive(Debug)]
pub struct EventDispatcher {
    runtime: Arc<dyn AgentRuntime>,
    tools: Arc<ToolRegistry>,
    sink: Arc<dyn PresentationSink>,
    author: String,
    current_run: Option<Run>,
    current_message: Option<MessageSurface>,
    current_step: Option<StepSurface>,
    filter: PresentationFilter,
    submitted: bool,
}

impl EventDispatcher {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        tools: Arc<ToolRegistry>,
        sink: Arc<dyn PresentationSink>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            tools,
            sink,
            author: author.into(),
            current_run: None,
            current_message: None,
            current_step: None,
            filter: PresentationFilter::new(),
            submitted: false,
        }
    }

    /// Adopt a message surface opened by a previous dispatcher.
    #[must_use]
    pub fn with_open_message(mut self, surface: Option<MessageSurface>) -> Self {
        self.current_message = surface;
        self
    }

    /// Last run object seen on this stream.
    pub fn current_run(&self) -> Option<&Run> {
        self.current_run.as_ref()
    }

    pub fn into_current_run(self) -> Option<Run> {
        self.current_run
    }

    /// Hand the open message surface to the next dispatcher.
    pub fn take_open_message(&mut self) -> Option<MessageSurface> {
        self.current_message.take()
    }

    pub async fn handle(&mut self, event: RunEvent) -> Dispatch {
        match event {
            RunEvent::RunStatus(run) => {
                tracing::debug!(run_id = %run.id, status = ?run.status, "Run status");
                self.current_run = Some(run);
            }
            RunEvent::TextCreated => {
                self.filter.reset();
                self.ensure_fresh_message().await;
            }
            RunEvent::TextDelta { delta, snapshot } => self.on_text_delta(&delta, &snapshot).await,
            RunEvent::TextDone(text) => self.on_text_done(text).await,
            RunEvent::ImageFileDone(file) => self.on_image(file).await,
            RunEvent::ToolCallCreated(call) => {
                if call.kind == ToolCallKind::CodeInterpreter {
                    self.open_code_step(&call.id).await;
                }
            }
            RunEvent::ToolCallDelta { delta, snapshot } => {
                self.on_tool_call_delta(&delta, &snapshot).await;
            }
            RunEvent::ToolCallDone(call) => return self.on_tool_call_done(call).await,
        }
        Dispatch::Continue
    }

    /// Close whatever is still open. An untouched message surface is removed.
    pub async fn finish(&mut self) {
        if let Some(step) = self.current_step.take() {
            self.emit(PresentationEvent::StepClose { id: step.id }).await;
        }
        if let Some(surface) = self.current_message.take() {
            let event = if surface.has_content {
                PresentationEvent::MessageClose { id: surface.id }
            } else {
                PresentationEvent::MessageRemove { id: surface.id }
            };
            self.emit(event).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Text
    // ─────────────────────────────────────────────────────────────────────

    async fn on_text_delta(&mut self, delta: &str, snapshot: &str) {
        let output = self.filter.apply(snapshot, delta);
        self.show(output).await;
    }

    async fn show(&mut self, output: FilterOutput) {
        match output {
            FilterOutput::Unchanged => {}
            FilterOutput::Append(text) => {
                let id = self.ensure_message().await;
                self.mark_content();
                self.emit(PresentationEvent::MessageToken { id, text }).await;
            }
            FilterOutput::Replace(text) => {
                if let Some(surface) = self.current_message.take() {
                    self.emit(PresentationEvent::MessageRemove { id: surface.id })
                        .await;
                }
                let id = self.open_message().await;
                self.mark_content();
                self.emit(PresentationEvent::MessageToken { id, text }).await;
            }
        }
    }

    async fn on_text_done(&mut self, text: TextContent) {
        // Text held back behind an unclosed citation glyph is shown now.
        let output = self.filter.flush(&text.value);
        self.show(output).await;

        let mut footnotes = Vec::new();

        for annotation in &text.annotations {
            match annotation {
                Annotation::FileCitation { file_citation, .. } => {
                    let filename = match self.runtime.retrieve_file(&file_citation.file_id).await {
                        Ok(file) => file.filename,
                        Err(e) => {
                            tracing::warn!(file_id = %file_citation.file_id, error = %e, "Could not resolve cited file");
                            file_citation.file_id.clone()
                        }
                    };
                    footnotes.push(format!("[{}] from {filename}", footnotes.len() + 1));
                }
                Annotation::FilePath { text: path, file_path } => {
                    self.deliver_file(path, file_path).await;
                }
                Annotation::Other => {}
            }
        }

        if !footnotes.is_empty() {
            self.emit(PresentationEvent::Message {
                id: surface_id(),
                author: Some(self.author.clone()),
                content: footnotes.join("\n"),
            })
            .await;
        }

        if let Some(surface) = self.current_message.take() {
            self.emit(PresentationEvent::MessageClose { id: surface.id })
                .await;
        }
    }

    /// Download a generated file and render it as an attachment of its own message.
    async fn deliver_file(&self, path: &str, file: &FileRef) {
        let content = match self.runtime.file_content(&file.file_id).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(file_id = %file.file_id, error = %e, "Could not download generated file");
                return;
            }
        };

        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mime = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let message_id = surface_id();

        self.emit(PresentationEvent::MessageOpen {
            id: message_id.clone(),
            author: self.author.clone(),
        })
        .await;
        self.emit(PresentationEvent::File {
            message_id: message_id.clone(),
            name,
            mime,
            content_base64: BASE64.encode(content),
        })
        .await;
        self.emit(PresentationEvent::MessageClose { id: message_id })
            .await;
    }

    async fn on_image(&mut self, file: FileRef) {
        let content = match self.runtime.file_content(&file.file_id).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(file_id = %file.file_id, error = %e, "Could not download image");
                return;
            }
        };

        let message_id = self.ensure_message().await;
        self.mark_content();
        self.emit(PresentationEvent::Image {
            message_id,
            name: file.file_id.clone(),
            content_base64: BASE64.encode(content),
        })
        .await;

        if let Err(e) = self.runtime.delete_file(&file.file_id).await {
            tracing::debug!(file_id = %file.file_id, error = %e, "Could not delete image file");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tools
    // ─────────────────────────────────────────────────────────────────────

    async fn on_tool_call_delta(&mut self, delta: &ToolCallDelta, snapshot: &ToolCall) {
        if snapshot.kind != ToolCallKind::CodeInterpreter {
            return;
        }

        let same_call = self
            .current_step
            .as_ref()
            .is_some_and(|step| step.tool_call_id == snapshot.id);
        if !same_call {
            self.open_code_step(&snapshot.id).await;
        }

        let Some(code) = &delta.code_interpreter else {
            return;
        };
        if let Some(input) = code.input.as_deref().filter(|i| !i.is_empty()) {
            if let Some(step) = &self.current_step {
                self.emit(PresentationEvent::StepToken {
                    id: step.id.clone(),
                    text: input.to_string(),
                })
                .await;
            }
        }
        for output in &code.outputs {
            tracing::trace!(tool_call_id = %snapshot.id, output = ?output, "Code interpreter output");
        }
    }

    async fn on_tool_call_done(&mut self, call: ToolCall) -> Dispatch {
        match call.kind {
            ToolCallKind::CodeInterpreter => {
                if let Some(step) = self.current_step.take() {
                    self.emit(PresentationEvent::StepClose { id: step.id }).await;
                }
                Dispatch::Continue
            }
            ToolCallKind::FileSearch => Dispatch::Continue,
            ToolCallKind::Function => {
                let awaiting = self
                    .current_run
                    .as_ref()
                    .is_some_and(|run| run.status == RunStatus::RequiresAction);
                if !awaiting || self.submitted {
                    tracing::debug!(tool_call_id = %call.id, "Function call finished outside of a tool-output request");
                    return Dispatch::Continue;
                }
                self.run_tool_batch().await
            }
        }
    }

    /// Execute every function call the run is waiting on and build the submission.
    async fn run_tool_batch(&mut self) -> Dispatch {
        let Some(run) = self.current_run.clone() else {
            return Dispatch::Continue;
        };

        let mut seen = HashSet::new();
        let calls: Vec<ToolCall> = run
            .pending_tool_calls()
            .iter()
            .filter(|call| call.kind == ToolCallKind::Function)
            .filter(|call| seen.insert(call.id.clone()))
            .cloned()
            .collect();
        if calls.is_empty() {
            tracing::warn!(run_id = %run.id, "Run requires action but lists no function calls");
            return Dispatch::Continue;
        }

        tracing::info!(run_id = %run.id, calls = calls.len(), "Executing function tools");
        let invocations = self.tools.invoke_batch(&calls).await;

        let mut outputs = Vec::with_capacity(invocations.len());
        for invocation in &invocations {
            self.render_audit(invocation).await;
            outputs.push(ToolOutput {
                tool_call_id: invocation.call.id.clone(),
                output: invocation.result.json_format.clone(),
            });
        }
        self.submitted = true;

        // The continuation streams into a fresh message.
        if let Some(surface) = self.current_message.take() {
            self.emit(PresentationEvent::MessageClose { id: surface.id })
                .await;
        }
        self.open_message().await;

        Dispatch::Resume(ToolSubmission {
            thread_id: run.thread_id,
            run_id: run.id,
            outputs,
        })
    }

    /// Show the call, its arguments and the human-readable result.
    async fn render_audit(&self, invocation: &ToolInvocation) {
        let function = invocation.call.function.clone().unwrap_or_default();
        let id = surface_id();

        self.emit(PresentationEvent::StepOpen {
            id: id.clone(),
            name: "function".to_string(),
            language: "sql".to_string(),
        })
        .await;
        for text in [
            format!("Function Name: {}\n", function.name),
            format!("Function Arguments: {}\n\n", function.arguments),
            invocation.result.display_format.clone(),
        ] {
            self.emit(PresentationEvent::StepToken {
                id: id.clone(),
                text,
            })
            .await;
        }
        self.emit(PresentationEvent::StepClose { id }).await;
    }

    async fn open_code_step(&mut self, tool_call_id: &str) {
        if let Some(step) = self.current_step.take() {
            self.emit(PresentationEvent::StepClose { id: step.id }).await;
        }
        let id = surface_id();
        self.emit(PresentationEvent::StepOpen {
            id: id.clone(),
            name: "code_interpreter".to_string(),
            language: "python".to_string(),
        })
        .await;
        self.current_step = Some(StepSurface {
            id,
            tool_call_id: tool_call_id.to_string(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Surfaces
    // ─────────────────────────────────────────────────────────────────────

    async fn open_message(&mut self) -> String {
        let id = surface_id();
        self.emit(PresentationEvent::MessageOpen {
            id: id.clone(),
            author: self.author.clone(),
        })
        .await;
        self.current_message = Some(MessageSurface {
            id: id.clone(),
            has_content: false,
        });
        id
    }

    /// Id of the open message, opening one if needed.
    async fn ensure_message(&mut self) -> String {
        match &self.current_message {
            Some(surface) => surface.id.clone(),
            None => self.open_message().await,
        }
    }

    /// Start a text block: reuse an empty open surface, otherwise open a new one.
    async fn ensure_fresh_message(&mut self) {
        match &self.current_message {
            Some(surface) if !surface.has_content => {}
            Some(_) => {
                if let Some(surface) = self.current_message.take() {
                    self.emit(PresentationEvent::MessageClose { id: surface.id })
                        .await;
                }
                self.open_message().await;
            }
            None => {
                self.open_message().await;
            }
        }
    }

    fn mark_content(&mut self) {
        if let Some(surface) = self.current_message.as_mut() {
            surface.has_content = true;
        }
    }

    async fn emit(&self, event: PresentationEvent) {
        self.sink.send(event).await;
    }
}
