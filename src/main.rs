//! Contoso Sales Assistant server
//!
//! Entry point: loads configuration, opens the sales database and serves
//! the chat API.

use std::sync::Arc;

use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sales_assistant::AppState;
use sales_assistant::assistant::{AgentRuntime, AssistantsClient};
use sales_assistant::config::{AppConfig, load_agent_settings};
use sales_assistant::sales_data::SalesData;
use sales_assistant::server::start_server;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env files (if present); env/.env wins over the process environment
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path_override("env/.env");

    init_tracing();

    let config = AppConfig::load()?;

    let settings = match load_agent_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        name: "agent.config.loaded",
        endpoint = %settings.endpoint,
        provider = ?settings.provider,
        assistant_id = %settings.assistant_id,
        "Agent runtime configuration loaded"
    );

    if config.auth.password.is_none() {
        tracing::warn!("USER_PASSWORD is not set; every authenticated request will be rejected");
    }

    let sales_data = Arc::new(
        SalesData::connect(config.database_path(), config.database.max_connections).await?,
    );

    let assistant_id = settings.assistant_id.clone();
    let model = settings.deployment.clone();
    let runtime: Arc<dyn AgentRuntime> = Arc::new(AssistantsClient::new(settings));

    let state = AppState::new(config, runtime, sales_data, assistant_id, model);
    start_server(state).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // LOG_FORMAT=json switches to structured JSON lines
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}
