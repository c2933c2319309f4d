mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum_test::TestServer;
use axum_test::multipart::MultipartForm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tower::ServiceExt;

use common::{Script, ScriptedRuntime, run, text_events};
use sales_assistant::AppState;
use sales_assistant::assistant::{AgentRuntime, RunEvent, RunStatus};
use sales_assistant::config::{
    AppConfig, AssistantConfig, AuthConfig, DatabaseConfig, ServerConfig,
};
use sales_assistant::server::build_router;

const PASSWORD: &str = "contoso";

fn config(password: Option<&str>) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            base_path: "/sales".to_string(),
        },
        database: DatabaseConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
        },
        assistant: AssistantConfig {
            name: "Contoso Sales Assistant".to_string(),
            temperature: 0.3,
            max_tool_rounds: 10,
            cancel_grace_ms: 0,
            upload_settle_ms: 0,
        },
        auth: AuthConfig {
            username: "assistant".to_string(),
            password: password.map(str::to_string),
        },
    }
}

async fn state(runtime: Arc<ScriptedRuntime>, password: Option<&str>) -> AppState {
    let runtime: Arc<dyn AgentRuntime> = runtime;
    AppState::new(
        config(password),
        runtime,
        common::sales_data().await,
        common::ASSISTANT_ID,
        None,
    )
}

fn basic(user: &str, password: &str) -> HeaderValue {
    let encoded = BASE64.encode(format!("{user}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server.get("/sales/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["assistant_ready"], false);
}

#[tokio::test]
async fn test_router_answers_a_single_request() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;

    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/sales/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");

    // Outside the base path nothing is routed.
    let response = build_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_requests_without_credentials_are_rejected() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server.get("/sales/starters").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let response = server
        .get("/sales/starters")
        .add_header(header::AUTHORIZATION, basic("assistant", "wrong"))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unset_password_rejects_everyone() {
    let state = state(ScriptedRuntime::new(vec![]), None).await;
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .get("/sales/starters")
        .add_header(header::AUTHORIZATION, basic("assistant", ""))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_starters() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .get("/sales/starters")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .await;
    response.assert_status_ok();

    let starters: Vec<Value> = response.json();
    assert_eq!(starters.len(), 4);
    assert_eq!(starters[0]["label"], "Help");
    assert_eq!(starters[0]["message"], "help.");
    assert_eq!(
        starters[3]["message"],
        "Download excel file for sales by category"
    );
}

#[tokio::test]
async fn test_chat_streams_turn_events() {
    let mut events = vec![RunEvent::RunStatus(run("run_1", RunStatus::InProgress))];
    events.extend(text_events(&["Hello", " there"]));
    events.push(RunEvent::RunStatus(run("run_1", RunStatus::Completed)));
    let runtime = ScriptedRuntime::new(vec![Script::new(events)]);

    let state = state(Arc::clone(&runtime), Some(PASSWORD)).await;
    let sessions = state.sessions.clone();
    let server = TestServer::new(build_router(state)).unwrap();

    let form = MultipartForm::new()
        .add_text("session_id", "chat-1")
        .add_text("message", "help.");
    let response = server
        .post("/sales/chat")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .multipart(form)
        .await;
    response.assert_status_ok();

    let body = response.text();
    let session_at = body.find("event: session").expect("session event");
    let token_at = body.find("event: message.token").expect("token event");
    let done_at = body.find("event: done").expect("done event");
    assert!(session_at < token_at && token_at < done_at);
    assert!(body.contains("chat-1"));
    assert!(body.contains("Hello"));

    let session = sessions.get("chat-1").expect("session kept");
    assert!(!session.has_active_turn());
    assert_eq!(runtime.messages.lock().unwrap()[0].1, "help.");
}

#[tokio::test]
async fn test_chat_requires_a_message() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;
    let server = TestServer::new(build_router(state)).unwrap();

    let form = MultipartForm::new().add_text("message", "   ");
    let response = server
        .post("/sales/chat")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_endpoint() {
    let state = state(ScriptedRuntime::new(vec![]), Some(PASSWORD)).await;
    let session = state.sessions.create_with_id("s1");
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .post("/sales/sessions/unknown/stop")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .post("/sales/sessions/s1/stop")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["stopped"], false);

    let token = session.begin_turn();
    let response = server
        .post("/sales/sessions/s1/stop")
        .add_header(header::AUTHORIZATION, basic("assistant", PASSWORD))
        .await;
    assert_eq!(response.json::<Value>()["stopped"], true);
    assert!(token.is_cancelled());
}
