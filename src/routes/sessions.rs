use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::{lobby::LobbyListing, session::SessionSnapshot},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Read-only session and lobby endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}", get(get_session))
        .route("/lobby", get(get_lobby))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Identifier of the session")),
    responses(
        (status = 200, description = "Current session state", body = SessionSnapshot),
        (status = 404, description = "Unknown session"),
        (status = 503, description = "Session not in memory and storage unavailable")
    )
)]
/// Return the current state of a session.
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(session_service::get_session(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/lobby",
    tag = "sessions",
    responses((status = 200, description = "Joinable and watchable sessions", body = LobbyListing))
)]
/// Return every joinable and watchable session.
pub async fn get_lobby(State(state): State<SharedState>) -> Result<Json<LobbyListing>, AppError> {
    Ok(Json(session_service::get_lobby(&state).await?))
}
