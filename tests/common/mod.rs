//! Shared fixtures: a scripted agent runtime and an in-memory sales database.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::sqlite::SqlitePoolOptions;

use sales_assistant::assistant::init::{AssistantProfile, AssistantState};
use sales_assistant::assistant::{
    AgentRuntime, Assistant, AssistantUpdate, Attachment, FileObject, MessageRole, RequiredAction,
    Run, RunEvent, RunEventStream, RunRequest, RunStatus, SubmitToolOutputs, ToolCall, ToolOutput,
};
use sales_assistant::error::AgentApiError;
use sales_assistant::orchestrator::RunOrchestrator;
use sales_assistant::sales_data::SalesData;
use sales_assistant::session::ThreadLifecycle;
use sales_assistant::tools::ToolRegistry;
use sales_assistant::turn::{TurnDriver, TurnSettings};

pub const ASSISTANT_ID: &str = "asst_test";
pub const THREAD_ID: &str = "thread_1";

/// One scripted event stream. `hang` keeps the stream open after the events.
#[derive(Debug, Default)]
pub struct Script {
    pub events: Vec<anyhow::Result<RunEvent>>,
    pub hang: bool,
}

impl Script {
    pub fn new(events: Vec<RunEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hang: false,
        }
    }

    pub fn failing_after(events: Vec<RunEvent>, error: &str) -> Self {
        let mut events: Vec<anyhow::Result<RunEvent>> = events.into_iter().map(Ok).collect();
        events.push(Err(anyhow::anyhow!(error.to_string())));
        Self {
            events,
            hang: false,
        }
    }

    pub fn hanging(events: Vec<RunEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hang: true,
        }
    }

    fn into_stream(self) -> RunEventStream {
        let head = futures::stream::iter(self.events);
        if self.hang {
            Box::pin(head.chain(futures::stream::pending()))
        } else {
            Box::pin(head)
        }
    }
}

/// Agent runtime that replays scripted streams and records every call.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    streams: Mutex<VecDeque<Script>>,
    pub threads_created: Mutex<usize>,
    pub messages: Mutex<Vec<(String, String, Vec<Attachment>)>>,
    pub run_requests: Mutex<Vec<RunRequest>>,
    pub submissions: Mutex<Vec<(String, Vec<ToolOutput>)>>,
    pub listed_runs: Mutex<Vec<Run>>,
    pub cancelled: Mutex<Vec<String>>,
    pub retrieves: Mutex<usize>,
    pub updates: Mutex<Vec<AssistantUpdate>>,
    pub uploads: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    pub assistant_missing: Mutex<bool>,
    pub thread_fails: Mutex<bool>,
    /// Thread-mutating calls in the order they arrived.
    pub journal: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn add_file(&self, id: &str, filename: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), (filename.to_string(), content.to_vec()));
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn next_stream(&self) -> anyhow::Result<RunEventStream> {
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .map(Script::into_stream)
            .ok_or_else(|| anyhow::anyhow!("no scripted stream left"))
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn create_thread(&self) -> anyhow::Result<String> {
        if *self.thread_fails.lock().unwrap() {
            anyhow::bail!("thread service unavailable");
        }
        *self.threads_created.lock().unwrap() += 1;
        Ok(THREAD_ID.to_string())
    }

    async fn create_message(
        &self,
        thread_id: &str,
        _role: MessageRole,
        content: &str,
        attachments: &[Attachment],
    ) -> anyhow::Result<()> {
        self.record(format!("message:{content}"));
        self.messages.lock().unwrap().push((
            thread_id.to_string(),
            content.to_string(),
            attachments.to_vec(),
        ));
        Ok(())
    }

    async fn start_run(
        &self,
        _thread_id: &str,
        request: &RunRequest,
    ) -> anyhow::Result<RunEventStream> {
        self.record("start_run".to_string());
        self.run_requests.lock().unwrap().push(request.clone());
        self.next_stream()
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<RunEventStream> {
        self.submissions
            .lock()
            .unwrap()
            .push((run_id.to_string(), outputs.to_vec()));
        self.next_stream()
    }

    async fn list_runs(&self, _thread_id: &str) -> anyhow::Result<Vec<Run>> {
        Ok(self.listed_runs.lock().unwrap().clone())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> anyhow::Result<()> {
        self.record(format!("cancel:{run_id}"));
        self.cancelled.lock().unwrap().push(run_id.to_string());
        Ok(())
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> anyhow::Result<Assistant> {
        *self.retrieves.lock().unwrap() += 1;
        if *self.assistant_missing.lock().unwrap() {
            return Err(AgentApiError {
                status: 404,
                body: r#"{"error":{"message":"No assistant found"}}"#.to_string(),
            }
            .into());
        }
        Ok(Assistant {
            id: assistant_id.to_string(),
            name: None,
        })
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        update: &AssistantUpdate,
    ) -> anyhow::Result<Assistant> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(Assistant {
            id: assistant_id.to_string(),
            name: Some(update.name.clone()),
        })
    }

    async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        let id = format!("file_upload_{}", self.uploads.lock().unwrap().len() + 1);
        self.uploads.lock().unwrap().push(name.to_string());
        self.add_file(&id, name, &bytes);
        Ok(id)
    }

    async fn retrieve_file(&self, file_id: &str) -> anyhow::Result<FileObject> {
        let files = self.files.lock().unwrap();
        let (filename, _) = files
            .get(file_id)
            .ok_or_else(|| anyhow::anyhow!("no such file"))?;
        Ok(FileObject {
            id: file_id.to_string(),
            filename: filename.clone(),
        })
    }

    async fn file_content(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files
            .get(file_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| anyhow::anyhow!("no such file"))
    }

    async fn delete_file(&self, file_id: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(file_id.to_string());
        Ok(())
    }
}

/// In-memory sales database with a handful of rows.
pub async fn sales_data() -> Arc<SalesData> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");

    sqlx::query(
        "CREATE TABLE sales_data (
            id INTEGER PRIMARY KEY,
            main_category TEXT,
            product_type TEXT,
            region TEXT,
            year INTEGER,
            revenue REAL
        )",
    )
    .execute(&pool)
    .await
    .expect("create table");

    sqlx::query(
        "INSERT INTO sales_data (main_category, product_type, region, year, revenue) VALUES
            ('WINTER SPORTS', 'SKIS', 'EUROPE', 2023, 1200.5),
            ('CLIMBING', 'ROPES', 'ASIA-PACIFIC', 2024, 310.25)",
    )
    .execute(&pool)
    .await
    .expect("insert rows");

    Arc::new(SalesData::from_pool(pool))
}

/// Turn driver over `runtime` with no artificial delays.
pub async fn driver(runtime: Arc<ScriptedRuntime>, max_tool_rounds: usize) -> TurnDriver {
    let runtime: Arc<dyn AgentRuntime> = runtime;
    let sales = sales_data().await;
    let tools = Arc::new(ToolRegistry::sales(Arc::clone(&sales)));
    let assistant = Arc::new(AssistantState::new(
        Arc::clone(&runtime),
        sales,
        Arc::clone(&tools),
        AssistantProfile {
            assistant_id: ASSISTANT_ID.to_string(),
            name: "Contoso Sales Assistant".to_string(),
            model: Some("gpt-4o".to_string()),
        },
    ));
    let lifecycle = ThreadLifecycle::new(Arc::clone(&runtime)).with_grace(Duration::ZERO);
    let orchestrator =
        RunOrchestrator::new(Arc::clone(&runtime), tools).with_max_tool_rounds(max_tool_rounds);

    TurnDriver::new(
        runtime,
        assistant,
        lifecycle,
        orchestrator,
        TurnSettings {
            temperature: 0.3,
            upload_settle: Duration::ZERO,
        },
    )
}

pub fn run(id: &str, status: RunStatus) -> Run {
    Run {
        id: id.to_string(),
        thread_id: THREAD_ID.to_string(),
        status,
        required_action: None,
        last_error: None,
    }
}

/// A run paused on the given function calls.
pub fn requires_action(id: &str, calls: Vec<ToolCall>) -> Run {
    Run {
        required_action: Some(RequiredAction {
            kind: "submit_tool_outputs".to_string(),
            submit_tool_outputs: Some(SubmitToolOutputs { tool_calls: calls }),
        }),
        ..run(id, RunStatus::RequiresAction)
    }
}

/// Text block events for `chunks`, with snapshots accumulated.
pub fn text_events(chunks: &[&str]) -> Vec<RunEvent> {
    let mut events = vec![RunEvent::TextCreated];
    let mut snapshot = String::new();
    for chunk in chunks {
        snapshot.push_str(chunk);
        events.push(RunEvent::TextDelta {
            delta: (*chunk).to_string(),
            snapshot: snapshot.clone(),
        });
    }
    events
}
