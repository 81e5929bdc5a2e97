//! Route handlers of the agent service

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use super::AppState;
use crate::agent::{AgentError, AgentInfo, RunEvent, RunInput, SessionSummary, Turn, UserMemory};
use crate::metrics;

/// Most memories returned by `GET /memories`
const MEMORY_LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// Body of `POST /agents/{agent_id}/runs`
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub message: String,
    /// Omitted: a new session is started
    #[serde(default)]
    pub session_id: Option<String>,
    /// Omitted: the service's default user
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `{"data": [...]}` envelope
#[derive(Debug, Serialize)]
pub struct DataList<T> {
    pub data: Vec<T>,
}

/// Terminal error event of a streamed run
#[derive(Debug, Serialize)]
struct RunErrorEvent<'a> {
    event: &'static str,
    session_id: &'a str,
    content: String,
    upstream: bool,
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(vec![state.agent.info()])
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if agent_id != state.agent.settings().agent_id {
        return Err(ApiError::NotFound(format!("agent {} not found", agent_id)));
    }

    let input = RunInput {
        user_id: request
            .user_id
            .unwrap_or_else(|| state.default_user_id.to_string()),
        session_id: request
            .session_id
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
        message: request.message,
    };

    if !request.stream {
        let output = state.agent.run_to_completion(input).await?;
        return Ok(Json(output).into_response());
    }

    let session_id = input.session_id.clone();
    let events = state.agent.run(input)?;
    let sse = events.map(move |item| Ok::<Event, Infallible>(to_sse_event(&session_id, item)));

    Ok(Sse::new(sse).keep_alive(KeepAlive::default()).into_response())
}

fn to_sse_event(session_id: &str, item: Result<RunEvent, AgentError>) -> Event {
    let encoded = match &item {
        Ok(event) => Event::default().event(event.name()).json_data(event),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "Run failed");
            Event::default().event("RunError").json_data(RunErrorEvent {
                event: "RunError",
                session_id,
                content: e.to_string(),
                upstream: e.is_upstream(),
            })
        }
    };
    encoded.unwrap_or_else(|e| {
        Event::default()
            .event("RunError")
            .data(format!("{{\"event\":\"RunError\",\"content\":\"unencodable event: {}\"}}", e))
    })
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<DataList<SessionSummary>>, ApiError> {
    let user_id = query_user(&state, query);
    let data = state.store.list_sessions(&user_id).await?;
    Ok(Json(DataList { data }))
}

pub async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<DataList<UserMemory>>, ApiError> {
    let user_id = query_user(&state, query);
    let data = state.store.user_memories(&user_id, MEMORY_LIST_LIMIT).await?;
    Ok(Json(DataList { data }))
}

/// `user_id` of the query string; blank or missing means the default user
fn query_user(state: &AppState, query: SessionQuery) -> String {
    query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| state.default_user_id.to_string())
}

pub async fn session_runs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DataList<Turn>>, ApiError> {
    let data = state.store.transcript(&session_id).await?;
    Ok(Json(DataList { data }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.store.delete_session(&session_id).await?;
    tracing::info!(session_id, deleted, "Session delete requested");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                detail: e.to_string(),
            }),
        )
            .into_response(),
    }
}
