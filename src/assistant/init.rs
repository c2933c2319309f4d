//! One-time configuration of the remote assistant.
//!
//! Before the first turn, the pre-provisioned assistant is rewritten with the
//! current instructions (which embed the live database schema) and the tool
//! set. Initialization is idempotent: once it succeeds, later calls return the
//! cached handle. A failed attempt leaves the state `Failed` and is retried on
//! the next call.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{AgentRuntime, AssistantUpdate};
use crate::error::{AgentApiError, InitError};
use crate::sales_data::SalesData;
use crate::tools::ToolRegistry;

/// Display name given to the assistant.
pub const ASSISTANT_NAME: &str = "Contoso Sales Assistant";

const INSTRUCTIONS: &[&str] = &[
    "You are a polite, professional assistant specializing in Contoso sales data analysis. Provide clear, concise explanations.",
    "Use the `ask_database` function for sales data queries, defaulting to aggregated data unless a detailed breakdown is requested. The function returns JSON data.",
    "Reference the following SQLite schema for the sales database: {schema}.",
    "Use the `file_search` tool to retrieve product information from uploaded files when relevant. Prioritize Contoso sales database data over files when responding.",
    "For sales data inquiries, present results in markdown tables by default unless the user requests visualizations.",
    "For visualizations: 1. Write and test code in your sandboxed environment. 2. Use the user's language preferences for visualizations (e.g. chart labels). 3. Display successful visualizations or retry upon error.",
    "If asked for 'help,' suggest example queries (e.g., 'What was last quarter's revenue?' or 'Top-selling products in Europe?').",
    "Only use data from the Contoso sales database or uploaded files to respond. If the query falls outside the available data or your expertise, or you're unsure, reply with: I'm unable to assist with that. Please ask more specific questions about Contoso sales and products or contact IT for further help.",
    "If faced with aggressive behavior, calmly reply: 'I'm here to help with sales data inquiries. For other issues, please contact IT.'",
    "Tailor responses to the user's language preferences, including terminology, measurement units, currency, and formats.",
    "For download requests, respond with: 'The download link is provided below.'",
    "Do not include markdown links to visualizations in your responses.",
];

/// Build the assistant instructions around a schema description.
pub fn build_instructions(schema: &str) -> String {
    INSTRUCTIONS
        .iter()
        .map(|line| line.replace("{schema}", schema))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The configured assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Ready(AssistantHandle),
    Failed(String),
}

/// Which assistant to configure and how.
#[derive(Debug, Clone)]
pub struct AssistantProfile {
    pub assistant_id: String,
    pub name: String,
    pub model: Option<String>,
}

#[derive(Debug)]
pub struct AssistantState {
    state: Mutex<InitState>,
    runtime: Arc<dyn AgentRuntime>,
    sales_data: Arc<SalesData>,
    tools: Arc<ToolRegistry>,
    profile: AssistantProfile,
}

impl AssistantState {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        sales_data: Arc<SalesData>,
        tools: Arc<ToolRegistry>,
        profile: AssistantProfile,
    ) -> Self {
        Self {
            state: Mutex::new(InitState::Uninitialized),
            runtime,
            sales_data,
            tools,
            profile,
        }
    }

    /// Configure the assistant unless that already succeeded.
    ///
    /// Concurrent callers wait on the same attempt.
    pub async fn initialize(&self) -> Result<AssistantHandle, InitError> {
        let mut state = self.state.lock().await;
        if let InitState::Ready(handle) = &*state {
            return Ok(handle.clone());
        }

        match self.configure().await {
            Ok(handle) => {
                tracing::info!(assistant_id = %handle.id, name = %handle.name, "Assistant ready");
                *state = InitState::Ready(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                match &e {
                    InitError::NotFound { assistant_id, .. } => {
                        tracing::error!(assistant_id = %assistant_id, error = %e, "Assistant not found");
                    }
                    _ => {
                        tracing::error!(error = %e, "An error occurred initializing the assistant");
                    }
                }
                *state = InitState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> InitState {
        self.state.lock().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.lock().await, InitState::Ready(_))
    }

    async fn configure(&self) -> Result<AssistantHandle, InitError> {
        let schema = self
            .sales_data
            .describe_schema()
            .await
            .map_err(InitError::Schema)?;

        let assistant_id = &self.profile.assistant_id;
        let assistant = self
            .runtime
            .retrieve_assistant(assistant_id)
            .await
            .map_err(|e| {
                if e.downcast_ref::<AgentApiError>()
                    .is_some_and(AgentApiError::is_not_found)
                {
                    InitError::NotFound {
                        assistant_id: assistant_id.clone(),
                        cause: e,
                    }
                } else {
                    InitError::Retrieve(e)
                }
            })?;

        let update = AssistantUpdate {
            name: self.profile.name.clone(),
            model: self.profile.model.clone(),
            instructions: build_instructions(&schema),
            tools: self.tools.assistant_tools_json(),
        };
        let updated = self
            .runtime
            .update_assistant(&assistant.id, &update)
            .await
            .map_err(InitError::Update)?;

        Ok(AssistantHandle {
            id: updated.id,
            name: updated.name.unwrap_or_else(|| self.profile.name.clone()),
        })
    }
}
