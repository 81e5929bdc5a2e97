//! HTTP API of the agent service
//!
//! Routes:
//! - `GET /health`
//! - `GET /agents`
//! - `POST /agents/{agent_id}/runs` (SSE when `stream` is true)
//! - `GET /sessions?user_id=`
//! - `GET /sessions/{session_id}/runs`
//! - `DELETE /sessions/{session_id}`
//! - `GET /memories?user_id=`
//! - `GET /metrics`

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{Agent, SessionStore};

pub use error::ApiError;
pub use handlers::RunRequest;

/// Shared state of the agent service
#[derive(Clone)]
pub struct AppState {
    pub agent: Agent,
    pub store: SessionStore,
    /// Used when a request names no user
    pub default_user_id: Arc<str>,
}

impl AppState {
    pub fn new(agent: Agent, store: SessionStore, default_user_id: impl Into<Arc<str>>) -> Self {
        Self {
            agent,
            store,
            default_user_id: default_user_id.into(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/{agent_id}/runs", post(handlers::create_run))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{session_id}/runs", get(handlers::session_runs))
        .route("/sessions/{session_id}", delete(handlers::delete_session))
        .route("/memories", get(handlers::list_memories))
        .route("/metrics", get(handlers::metrics_text))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
