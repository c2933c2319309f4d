//! Typed errors at the boundaries where callers branch on the failure kind.
//!
//! Everything else propagates as [`anyhow::Error`].

use thiserror::Error;

use crate::assistant::RunStatus;

/// Non-success HTTP response from the agent runtime.
#[derive(Debug, Error)]
#[error("agent runtime returned HTTP {status}: {body}")]
pub struct AgentApiError {
    pub status: u16,
    pub body: String,
}

impl AgentApiError {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Assistant initialization failures.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to describe the sales database: {0:#}")]
    Schema(anyhow::Error),

    #[error("assistant {assistant_id} was not found: {cause:#}")]
    NotFound {
        assistant_id: String,
        cause: anyhow::Error,
    },

    #[error("failed to retrieve assistant: {0:#}")]
    Retrieve(anyhow::Error),

    #[error("failed to update assistant: {0:#}")]
    Update(anyhow::Error),
}

/// Reasons a conversation turn ends without completing.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("assistant is not ready: {0}")]
    NotReady(#[from] InitError),

    #[error("failed to create a conversation thread: {0:#}")]
    Thread(anyhow::Error),

    #[error("agent runtime request failed: {0:#}")]
    Agent(anyhow::Error),

    #[error("run event stream failed: {0:#}")]
    Stream(anyhow::Error),

    #[error("run ended with status {status:?}: {message}")]
    RunFailed { status: RunStatus, message: String },

    #[error("run ended before reporting a final status")]
    Unfinished,

    #[error("tool round limit of {0} exceeded")]
    ToolRoundLimit(usize),

    #[error("turn cancelled by the user")]
    Cancelled,
}
