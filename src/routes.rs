//! REST endpoints for flows and sessions.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{Error, TurnError};
use crate::session::SessionManager;

/// Shared state for the flow routes.
#[derive(Clone)]
pub struct FlowRouteState {
    pub manager: Arc<SessionManager>,
}

/// Build the REST router.
pub fn flow_routes(manager: Arc<SessionManager>) -> Router {
    let state = FlowRouteState { manager };

    Router::new()
        .route("/health", get(health))
        .route("/api/flows", get(list_flows))
        .route("/api/flows/{flow_id}/sessions", post(create_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/messages", post(send_message))
        .route("/api/sessions/{id}/transcript", get(get_transcript))
        .route("/api/sessions/{id}/terminate", post(terminate_session))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Map an engine error onto an HTTP status and `{"error": ...}` body.
fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Turn(TurnError::Inactive(_)) => StatusCode::CONFLICT,
        Error::Turn(TurnError::Generation(_) | TurnError::Evaluation(_)) | Error::Llm(_) => {
            if err.is_transient() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            }
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %err, "Request failed");
    }
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

fn parse_session_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid session ID"})),
        )
            .into_response()
    })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "convo-flow"
    }))
}

// ── Flows ───────────────────────────────────────────────────────────────

async fn list_flows(State(state): State<FlowRouteState>) -> impl IntoResponse {
    Json(state.manager.registry().list())
}

async fn create_session(
    State(state): State<FlowRouteState>,
    Path(flow_id): Path<String>,
) -> Response {
    let session_id = match state.manager.create_session(&flow_id).await {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };
    match state.manager.get_status(session_id).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn list_sessions(State(state): State<FlowRouteState>) -> impl IntoResponse {
    Json(state.manager.list_sessions().await)
}

async fn get_session(State(state): State<FlowRouteState>, Path(id): Path<String>) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.get_status(session_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct MessageRequest {
    message: String,
}

async fn send_message(
    State(state): State<FlowRouteState>,
    Path(id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Message must not be empty"})),
        )
            .into_response();
    }
    match state.manager.advance(session_id, &body.message).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_transcript(State(state): State<FlowRouteState>, Path(id): Path<String>) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.transcript(session_id).await {
        Ok(transcript) => Json(transcript).into_response(),
        Err(e) => error_response(e),
    }
}

async fn terminate_session(
    State(state): State<FlowRouteState>,
    Path(id): Path<String>,
) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.manager.terminate(session_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}
