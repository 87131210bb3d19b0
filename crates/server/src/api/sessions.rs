//! # Session API
//!
//! Live streaming sessions with their advisory phase estimate, plus
//! explicit cancellation for clients that cannot simply disconnect.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::transport::SessionInfo;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub id: String,
    pub cancelled: bool,
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:id", get(get_session))
        .route("/:id/cancel", post(cancel_session))
}

/// List live sessions
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "Live sessions, oldest first", body = Vec<SessionInfo>)
    )
)]
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

/// Get one live session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionInfo),
        (status = 404, description = "No live session with this id")
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    state.sessions.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Cancel a live session; its stream closes with `done`
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/cancel",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Cancellation signalled", body = CancelResponse),
        (status = 404, description = "No live session with this id")
    )
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, StatusCode> {
    if state.sessions.cancel(&id) {
        Ok(Json(CancelResponse { id, cancelled: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
