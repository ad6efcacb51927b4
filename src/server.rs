use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::agent;
use crate::config::Config;
use crate::error::AgentError;
use crate::model::ModelClient;
use crate::overseer;
use crate::session::{BrowserSession, SessionClient};

/// Events streamed to observers via SSE while a command runs.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Thinking {
        session_id: String,
    },
    Step {
        session_id: String,
        number: usize,
        description: String,
    },
    StepBlocked {
        session_id: String,
        reason: String,
    },
    StepError {
        session_id: String,
        message: String,
    },
    TaskComplete {
        session_id: String,
        summary: String,
    },
    TaskError {
        session_id: String,
        message: String,
    },
}

impl AgentEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            AgentEvent::Thinking { session_id } => Event::default()
                .event("thinking")
                .data(json!({ "sessionId": session_id }).to_string()),
            AgentEvent::Step {
                session_id,
                number,
                description,
            } => Event::default().event("step").data(
                json!({ "sessionId": session_id, "number": number, "description": description })
                    .to_string(),
            ),
            AgentEvent::StepBlocked { session_id, reason } => Event::default()
                .event("step_blocked")
                .data(json!({ "sessionId": session_id, "reason": reason }).to_string()),
            AgentEvent::StepError {
                session_id,
                message,
            } => Event::default()
                .event("step_error")
                .data(json!({ "sessionId": session_id, "message": message }).to_string()),
            AgentEvent::TaskComplete {
                session_id,
                summary,
            } => Event::default()
                .event("task_complete")
                .data(json!({ "sessionId": session_id, "summary": summary }).to_string()),
            AgentEvent::TaskError {
                session_id,
                message,
            } => Event::default()
                .event("task_error")
                .data(json!({ "sessionId": session_id, "message": message }).to_string()),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub model: Arc<dyn ModelClient>,
    pub sessions: SessionClient,
    pub events: broadcast::Sender<AgentEvent>,
}

type ApiError = (StatusCode, String);
type ApiResult = Result<Json<Value>, ApiError>;

fn provider_error(err: AgentError) -> ApiError {
    (StatusCode::BAD_GATEWAY, err.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/{id}", get(get_session_handler))
        .route("/api/sessions/{id}/debug", get(debug_handler))
        .route("/api/sessions/{id}/end", post(end_session_handler))
        .route("/api/command", post(command_handler))
        .route("/api/suggestions", post(suggestions_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

async fn create_session_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let session = state
        .sessions
        .create_session()
        .await
        .map_err(provider_error)?;
    Ok(Json(serde_json::to_value(session).unwrap_or_default()))
}

async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let session = state
        .sessions
        .get_session(&id)
        .await
        .map_err(provider_error)?;
    Ok(Json(serde_json::to_value(session).unwrap_or_default()))
}

async fn debug_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let url = state.sessions.debug_url(&id).await.map_err(provider_error)?;
    Ok(Json(json!({ "debuggerFullscreenUrl": url })))
}

async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state
        .sessions
        .end_session(&id)
        .await
        .map_err(provider_error)?;
    Ok(Json(json!({ "status": "RELEASED" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandPayload {
    session_id: String,
    prompt: String,
}

async fn attach_driver(
    state: &AppState,
    session_id: &str,
) -> Result<BrowserSession, ApiError> {
    let session = state
        .sessions
        .get_session(session_id)
        .await
        .map_err(provider_error)?;
    let connect_url = session.connect_url.ok_or((
        StatusCode::BAD_REQUEST,
        "session has no connect URL".to_string(),
    ))?;

    tokio::task::spawn_blocking(move || BrowserSession::attach(&connect_url))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("browser attach panicked: {e}"),
            )
        })?
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("{e:#}")))
}

/// The command entry point: run one full perceive-plan-verify-act loop
/// against the session's browser. Re-invocation is a fresh attempt with
/// cleared history over the same page state.
async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> ApiResult {
    info!(session_id = %payload.session_id, prompt = %payload.prompt, "command received");
    let mut driver = attach_driver(&state, &payload.session_id).await?;

    let outcome = agent::run_command(
        &payload.prompt,
        &payload.session_id,
        &mut driver,
        state.model.as_ref(),
        state.config.max_steps,
        &state.events,
    )
    .await;

    Ok(Json(json!({
        "finalResponse": outcome.final_response,
        "intentMap": outcome.intent_map,
        "history": outcome.history,
    })))
}

/// Build a world model and intent map without executing anything; feeds
/// the UI's suggestion affordances.
async fn suggestions_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> ApiResult {
    use crate::agent::Driver as _;

    let mut driver = attach_driver(&state, &payload.session_id).await?;
    let world = driver
        .perceive(None, None)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("{e:#}")))?;
    let intent_map = overseer::map_intent(state.model.as_ref(), &payload.prompt, &world)
        .await
        .map_err(provider_error)?;

    Ok(Json(json!({ "intentMap": intent_map })))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}
