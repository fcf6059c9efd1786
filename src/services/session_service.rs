//! Read-only projections of sessions for the REST surface.

use tracing::debug;
use uuid::Uuid;

use crate::{
    dto::{lobby::LobbyListing, session::SessionSnapshot},
    error::ServiceError,
    state::SharedState,
};

/// Current state of a session: the live copy when the hub holds it, the stored mirror otherwise.
pub async fn get_session(state: &SharedState, id: Uuid) -> Result<SessionSnapshot, ServiceError> {
    if let Some(snapshot) = state.hub().snapshot(id).await? {
        return Ok(snapshot);
    }

    debug!(session_id = %id, "session not in memory, reading the stored mirror");
    let store = state
        .store()
        .current()
        .await
        .ok_or(ServiceError::Degraded)?;
    store
        .read(id)
        .await?
        .map(SessionSnapshot::from)
        .ok_or_else(|| ServiceError::NotFound(format!("session {id}")))
}

/// Unfiltered lobby listing.
pub async fn get_lobby(state: &SharedState) -> Result<LobbyListing, ServiceError> {
    state.hub().lobby().await
}
