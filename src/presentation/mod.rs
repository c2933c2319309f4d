//! Presentation events sent to the chat UI.
//!
//! The orchestrator never talks to the UI directly. It emits
//! [`PresentationEvent`]s into a [`PresentationSink`]; the HTTP layer frames
//! them as Server-Sent Events.
//!
//! Two kinds of surfaces exist:
//! - **messages** carry assistant text and attachments
//! - **steps** carry tool activity (code interpreter input, function audits)
//!
//! Surfaces are addressed by opaque ids minted with [`surface_id`].

pub mod filter;

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use filter::{FilterOutput, PresentationFilter, PresentationState};

/// Events rendered by the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum PresentationEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Turn Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    /// First event of every turn; tells the client which session it belongs to.
    #[serde(rename = "session")]
    Session { session_id: String },

    // ─────────────────────────────────────────────────────────────────────
    // Message Surfaces
    // ─────────────────────────────────────────────────────────────────────
    /// A new, empty message surface.
    #[serde(rename = "message.open")]
    MessageOpen { id: String, author: String },

    /// Text appended to an open message surface.
    #[serde(rename = "message.token")]
    MessageToken { id: String, text: String },

    /// The surface is discarded; a corrected one follows.
    #[serde(rename = "message.remove")]
    MessageRemove { id: String },

    /// The surface is final.
    #[serde(rename = "message.close")]
    MessageClose { id: String },

    /// A complete standalone message.
    #[serde(rename = "message")]
    Message {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        author: Option<String>,
        content: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Tool Steps
    // ─────────────────────────────────────────────────────────────────────
    /// A tool-execution surface tagged with its language.
    #[serde(rename = "step.open")]
    StepOpen {
        id: String,
        name: String,
        language: String,
    },

    /// Text appended to an open step.
    #[serde(rename = "step.token")]
    StepToken { id: String, text: String },

    /// The step is final.
    #[serde(rename = "step.close")]
    StepClose { id: String },

    // ─────────────────────────────────────────────────────────────────────
    // Attachments
    // ─────────────────────────────────────────────────────────────────────
    /// A downloadable file, rendered inline in its own message.
    #[serde(rename = "file")]
    File {
        message_id: String,
        name: String,
        mime: String,
        content_base64: String,
    },

    /// An image attached to an existing message surface.
    #[serde(rename = "image")]
    Image {
        message_id: String,
        name: String,
        content_base64: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Errors and Completion
    // ─────────────────────────────────────────────────────────────────────
    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "done")]
    Done,
}

impl PresentationEvent {
    /// SSE event name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::MessageOpen { .. } => "message.open",
            Self::MessageToken { .. } => "message.token",
            Self::MessageRemove { .. } => "message.remove",
            Self::MessageClose { .. } => "message.close",
            Self::Message { .. } => "message",
            Self::StepOpen { .. } => "step.open",
            Self::StepToken { .. } => "step.token",
            Self::StepClose { .. } => "step.close",
            Self::File { .. } => "file",
            Self::Image { .. } => "image",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// Mint a fresh surface id.
pub fn surface_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Destination for presentation events.
///
/// Delivery is best effort: a disconnected client must not fail the turn.
#[async_trait::async_trait]
pub trait PresentationSink: Send + Sync + std::fmt::Debug {
    async fn send(&self, event: PresentationEvent);
}

/// Sink that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PresentationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<PresentationEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl PresentationSink for ChannelSink {
    async fn send(&self, event: PresentationEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Presentation receiver dropped; event discarded");
        }
    }
}

/// Sink that keeps every event in memory. Used by tests and by callers that
/// render a turn after the fact.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PresentationEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<PresentationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Concatenated text of every standalone message, in order.
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PresentationEvent::Message { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PresentationSink for RecordingSink {
    async fn send(&self, event: PresentationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
