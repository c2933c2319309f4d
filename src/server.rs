use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::presentation::{ChannelSink, PresentationEvent, PresentationSink};
use crate::session::DEFAULT_SESSION_TIMEOUT;
use crate::turn::{Upload, UserMessage};

/// Largest accepted chat request (message plus attachments).
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Build the application router, mounted under the configured base path.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/starters", get(api_starters))
        .route("/chat", post(api_chat))
        .route("/sessions/{id}/stop", post(api_stop))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            basic_auth_middleware,
        ));

    let routes = Router::new()
        .route("/health", get(api_health))
        .merge(protected);

    let base_path = state.config.server.base_path.trim_end_matches('/').to_string();
    let app = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    };

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server and run until SIGINT.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let config = Arc::clone(&state.config);
    let sales_data = Arc::clone(&state.sales_data);

    let sessions = state.sessions.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = sessions.cleanup_expired_with_timeout(DEFAULT_SESSION_TIMEOUT);
            if removed > 0 {
                info!(removed, "Expired sessions removed");
            }
        }
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        base_path = %config.server.base_path,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    sales_data.close().await;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Basic auth against the single configured credential pair.
pub async fn basic_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| BASE64.decode(encoded.trim()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());

    let auth = &state.config.auth;
    let authorized = match (credentials, auth.password.as_deref()) {
        (Some(pair), Some(password)) => pair
            .split_once(':')
            .is_some_and(|(user, pass)| user == auth.username && pass == password),
        _ => false,
    };

    if authorized {
        return next.run(request).await;
    }

    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"sales\""),
    );
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    assistant_ready: bool,
    sessions: usize,
}

/// GET /health
async fn api_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        assistant_ready: state.turns.assistant().is_ready().await,
        sessions: state.sessions.len(),
    })
}

/// A suggested first message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Starter {
    pub label: &'static str,
    pub message: &'static str,
    pub icon: &'static str,
}

pub const STARTERS: &[Starter] = &[
    Starter {
        label: "Help",
        message: "help.",
        icon: "/public/idea.svg",
    },
    Starter {
        label: "Create a vivid pie chart of sales by region.",
        message: "Create a vivid pie chart of sales by region.",
        icon: "/public/learn.svg",
    },
    Starter {
        label: "Staafdiagram van maandelijkse inkomsten voor wintersportproducten in 2023 met levendige kleuren.",
        message: "Staafdiagram van maandelijkse inkomsten voor wintersportproducten in 2023 met levendige kleuren.",
        icon: "/public/terminal.svg",
    },
    Starter {
        label: "Download excel file for sales by category",
        message: "Download excel file for sales by category",
        icon: "/public/write.svg",
    },
];

/// GET /starters
async fn api_starters() -> Json<&'static [Starter]> {
    Json(STARTERS)
}

#[derive(Debug, Default)]
struct ChatForm {
    session_id: Option<String>,
    message: UserMessage,
}

async fn read_chat_form(mut multipart: Multipart) -> Result<ChatForm, (StatusCode, String)> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, format!("invalid multipart body: {e}"))
    };

    let mut form = ChatForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_id" => {
                let id = field.text().await.map_err(bad_request)?;
                form.session_id = Some(id).filter(|id| !id.trim().is_empty());
            }
            "message" => form.message.content = field.text().await.map_err(bad_request)?,
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(bad_request)?;
                form.message.uploads.push(Upload {
                    name: file_name,
                    bytes: bytes.to_vec(),
                });
            }
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    if form.message.content.trim().is_empty() && form.message.uploads.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    Ok(form)
}

/// POST /chat - Run one turn and stream its presentation events.
async fn api_chat(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, (StatusCode, String)> {
    let form = read_chat_form(multipart).await?;
    let session = match &form.session_id {
        Some(id) => state.sessions.get_or_create(id),
        None => state.sessions.create(),
    };

    tracing::info!(
        session_id = %session.id(),
        uploads = form.message.uploads.len(),
        "Received chat request"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx));
    let cancel = session.begin_turn();
    let turns = Arc::clone(&state.turns);

    // The turn owns its task so a client disconnect never interrupts run cleanup.
    tokio::spawn(async move {
        sink.send(PresentationEvent::Session {
            session_id: session.id().to_string(),
        })
        .await;

        let outcome = turns
            .handle_message(&session, form.message, sink.clone(), cancel.clone())
            .await;
        session.end_turn(&cancel);

        tracing::info!(session_id = %session.id(), outcome = ?outcome, "Turn finished");
        sink.send(PresentationEvent::Done).await;
    });

    Ok(build_sse_response(UnboundedReceiverStream::new(rx)))
}

/// Frame presentation events as SSE.
pub fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = PresentationEvent> + Send + 'static,
{
    let stream = stream.map(|event| {
        let sse_event = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Ok(sse_event)
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Serialize)]
struct StopResponse {
    stopped: bool,
}

/// POST /sessions/{id}/stop - Stop the session's turn in flight.
async fn api_stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, StatusCode> {
    let session = state.sessions.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let stopped = session.cancel_turn();
    tracing::info!(session_id = %id, stopped, "Stop requested");
    Ok(Json(StopResponse { stopped }))
}
