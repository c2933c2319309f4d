use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

use crate::assistant::provider::DEFAULT_AZURE_API_VERSION;
use crate::assistant::{AgentSettings, Provider};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Path to the sales database
    #[arg(long, env = "DATABASE_PATH")]
    pub database: Option<String>,

    /// Sampling temperature for runs
    #[arg(long)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub assistant: AssistantConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Path prefix the chat surface is mounted under.
    pub base_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    pub name: String,
    pub temperature: f32,
    pub max_tool_rounds: usize,
    pub cancel_grace_ms: u64,
    pub upload_settle_ms: u64,
}

impl AssistantConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub username: String,
    /// Shared password. When unset, every request is rejected.
    #[serde(default)]
    pub password: Option<String>,
}

/// Default database location for the current `ENV` (unset means development).
pub fn default_database_path() -> &'static str {
    match env::var("ENV").as_deref() {
        Ok("development") | Err(_) => "src/database/contoso-sales.db",
        Ok(_) => "database/contoso-sales.db",
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        // 1. Defaults
        let mut builder = Config::builder()
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.base_path", "/sales")?
            .set_default("database.path", default_database_path())?
            .set_default("database.max_connections", 4)?
            .set_default("assistant.name", crate::assistant::init::ASSISTANT_NAME)?
            .set_default("assistant.temperature", 0.3)?
            .set_default("assistant.max_tool_rounds", 10)?
            .set_default("assistant.cancel_grace_ms", 2000)?
            .set_default("assistant.upload_settle_ms", 1000)?
            .set_default("auth.username", "assistant")?;

        // 2. Config file: explicit path, else ./config.yaml when present
        match &cli.config {
            Some(path) => {
                builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
            }
            None if Path::new("config.yaml").exists() => {
                builder = builder.add_source(File::new("config.yaml", FileFormat::Yaml));
            }
            None => {}
        }

        // 3. Environment, e.g. SALES_SERVER__PORT=8080
        builder = builder.add_source(
            Environment::with_prefix("SALES")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(password) = env::var("USER_PASSWORD") {
            builder = builder.set_override("auth.password", password)?;
        }

        // 4. CLI overrides
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(database) = cli.database {
            builder = builder.set_override("database.path", database)?;
        }
        if let Some(temperature) = cli.temperature {
            builder = builder.set_override("assistant.temperature", f64::from(temperature))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}

/// Load agent runtime connection settings from the environment.
///
/// Azure variables take precedence; `OPENAI_BASE_URL`/`OPENAI_API_KEY` serve
/// `OpenAI` and compatible endpoints.
pub fn load_agent_settings() -> Result<AgentSettings, String> {
    let non_empty = |name: &str| env::var(name).ok().filter(|s| !s.trim().is_empty());

    let endpoint = non_empty("AZURE_OPENAI_ENDPOINT")
        .or_else(|| non_empty("OPENAI_BASE_URL"))
        .ok_or_else(|| {
            "Missing required env var: AZURE_OPENAI_ENDPOINT (or OPENAI_BASE_URL)".to_string()
        })?;

    let parsed = Url::parse(&endpoint).map_err(|e| format!("Invalid endpoint URL {endpoint}: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("Endpoint must be http(s): {endpoint}"));
    }

    let assistant_id = non_empty("AZURE_OPENAI_ASSISTANT_ID")
        .ok_or_else(|| "Missing required env var: AZURE_OPENAI_ASSISTANT_ID".to_string())?;

    let api_key = non_empty("AZURE_OPENAI_API_KEY").or_else(|| non_empty("OPENAI_API_KEY"));

    let api_version =
        non_empty("AZURE_OPENAI_API_VERSION").unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
    let provider = Provider::detect_from_url(&endpoint).with_api_version(api_version);

    Ok(AgentSettings {
        endpoint,
        api_key,
        assistant_id,
        deployment: non_empty("AZURE_OPENAI_DEPLOYMENT"),
        provider,
    })
}
