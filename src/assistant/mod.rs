//! Agent runtime boundary.
//!
//! The agent runtime is a stateful, Assistants-style HTTP service: threads
//! hold the conversation, runs execute the agent over a thread and stream
//! events back, and function tool calls pause a run until their outputs are
//! submitted.
//!
//! # Overview
//!
//! - [`AgentRuntime`]: the operations the orchestrator needs from the runtime
//! - [`client::AssistantsClient`]: HTTP implementation (`OpenAI` or Azure)
//! - [`events`]: wire decoding and derivation of [`RunEvent`]s
//! - [`init::AssistantState`]: one-time configuration of the remote assistant

pub mod client;
pub mod events;
pub mod init;
pub mod provider;

pub use client::AssistantsClient;
pub use events::{RunEvent, RunEventStream};
pub use provider::Provider;

use serde::{Deserialize, Serialize};

/// Connection settings for the agent runtime.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Base endpoint (e.g., `https://my-resource.openai.azure.com`).
    pub endpoint: String,
    /// API key; sent as `api-key` for Azure and as a bearer token otherwise.
    pub api_key: Option<String>,
    /// Identifier of the pre-provisioned assistant.
    pub assistant_id: String,
    /// Model deployment the assistant is pinned to on initialization.
    pub deployment: Option<String>,
    /// Provider type (auto-detected from `endpoint`).
    pub provider: Provider,
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Runs in these states no longer block the thread.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Expired | Self::Failed
        )
    }
}

/// One execution of the agent over a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RunError>,
}

impl Run {
    /// Tool calls the run is waiting on, if any.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .and_then(|a| a.submit_tool_outputs.as_ref())
            .map_or(&[], |s| s.tool_calls.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Kind of tool the agent invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    #[default]
    Function,
    CodeInterpreter,
    FileSearch,
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<CodeInterpreterCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_search: Option<serde_json::Value>,
}

impl ToolCall {
    /// Build a function call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
                output: None,
            }),
            ..Self::default()
        }
    }

    /// Function name, or the tool kind for built-in tools.
    pub fn display_name(&self) -> &str {
        match (&self.kind, &self.function) {
            (ToolCallKind::Function, Some(f)) => &f.name,
            (ToolCallKind::Function, None) => "function",
            (ToolCallKind::CodeInterpreter, _) => "code_interpreter",
            (ToolCallKind::FileSearch, _) => "file_search",
        }
    }
}

/// Function name plus its JSON-encoded arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeInterpreterCall {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub outputs: Vec<CodeInterpreterOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodeInterpreterOutput {
    Logs { logs: String },
    Image { image: FileRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

/// Output of one tool call, addressed by the call's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Text content of a message, with its annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Annotation attached to a span of message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// Reference to a file the agent quoted from.
    FileCitation {
        #[serde(default)]
        text: String,
        file_citation: FileRef,
    },
    /// Reference to a file the agent generated.
    FilePath {
        #[serde(default)]
        text: String,
        file_path: FileRef,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// File attached to a user message, searchable by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: String,
    pub tools: Vec<serde_json::Value>,
}

impl Attachment {
    pub fn file_search(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            tools: vec![serde_json::json!({ "type": "file_search" })],
        }
    }
}

/// Parameters for starting a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub assistant_id: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Fields rewritten on the remote assistant at initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub instructions: String,
    pub tools: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

/// Operations the orchestrator needs from the agent runtime.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync + std::fmt::Debug {
    async fn create_thread(&self) -> anyhow::Result<String>;

    async fn create_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        attachments: &[Attachment],
    ) -> anyhow::Result<()>;

    /// Start a run and stream its events.
    async fn start_run(&self, thread_id: &str, request: &RunRequest)
    -> anyhow::Result<RunEventStream>;

    /// Resume a run paused on tool calls; the continuation streams as a new
    /// event sequence.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<RunEventStream>;

    async fn list_runs(&self, thread_id: &str) -> anyhow::Result<Vec<Run>>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> anyhow::Result<()>;

    async fn retrieve_assistant(&self, assistant_id: &str) -> anyhow::Result<Assistant>;

    async fn update_assistant(
        &self,
        assistant_id: &str,
        update: &AssistantUpdate,
    ) -> anyhow::Result<Assistant>;

    /// Upload a file for use by the assistant; returns its id.
    async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> anyhow::Result<String>;

    async fn retrieve_file(&self, file_id: &str) -> anyhow::Result<FileObject>;

    async fn file_content(&self, file_id: &str) -> anyhow::Result<Vec<u8>>;

    async fn delete_file(&self, file_id: &str) -> anyhow::Result<()>;
}
