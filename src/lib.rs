//! Contoso Sales Assistant
//!
//! A conversational sales analyst. User messages are answered by a hosted
//! assistant (`OpenAI` or Azure `OpenAI` Assistants) that can query a
//! read-only `SQLite` sales database through a function tool, run code
//! interpreter for charts and files, and search uploaded documents.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server streaming each turn as SSE
//! - **Assistant runtime**: REST + streaming client for threads, runs and files
//! - **Orchestration**: event dispatch and the tool-output loop of a run
//! - **Sales data**: `SQLite` access that never fails a tool call
//!
//! # Modules
//!
//! - [`assistant`]: runtime trait, wire types, streaming decoder, initialization
//! - [`orchestrator`]: drives a run and its tool rounds to completion
//! - [`presentation`]: UI events and the link-stripping text filter
//! - [`session`]: sessions, their threads and run cleanup
//! - [`turn`]: one user message end to end

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod assistant;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod presentation;
pub mod sales_data;
pub mod server;
pub mod session;
pub mod tools;
pub mod turn;

use std::sync::Arc;

use crate::assistant::AgentRuntime;
use crate::assistant::init::{AssistantProfile, AssistantState};
use crate::config::AppConfig;
use crate::orchestrator::RunOrchestrator;
use crate::sales_data::SalesData;
use crate::session::{SessionStore, ThreadLifecycle};
use crate::tools::ToolRegistry;
use crate::turn::{TurnDriver, TurnSettings};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Turn driver shared by every session.
    pub turns: Arc<TurnDriver>,
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Sales database behind the `ask_database` tool.
    pub sales_data: Arc<SalesData>,
    /// Application configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire the runtime, tools and database into a ready-to-serve state.
    ///
    /// The assistant is configured lazily on the first turn.
    pub fn new(
        config: AppConfig,
        runtime: Arc<dyn AgentRuntime>,
        sales_data: Arc<SalesData>,
        assistant_id: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::sales(Arc::clone(&sales_data)));

        let assistant = Arc::new(AssistantState::new(
            Arc::clone(&runtime),
            Arc::clone(&sales_data),
            Arc::clone(&tools),
            AssistantProfile {
                assistant_id: assistant_id.into(),
                name: config.assistant.name.clone(),
                model,
            },
        ));

        let lifecycle =
            ThreadLifecycle::new(Arc::clone(&runtime)).with_grace(config.assistant.cancel_grace());
        let orchestrator = RunOrchestrator::new(Arc::clone(&runtime), tools)
            .with_max_tool_rounds(config.assistant.max_tool_rounds);
        let settings = TurnSettings {
            temperature: config.assistant.temperature,
            upload_settle: config.assistant.upload_settle(),
        };

        let turns = Arc::new(TurnDriver::new(
            runtime,
            assistant,
            lifecycle,
            orchestrator,
            settings,
        ));

        Self {
            turns,
            sessions: SessionStore::new(),
            sales_data,
            config: Arc::new(config),
        }
    }
}
