use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Open session waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JoinableSummary {
    pub session_id: Uuid,
    pub host: String,
    pub time_control: String,
}

/// Active session that can be watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WatchableSummary {
    pub session_id: Uuid,
    /// Display label, `white vs black`.
    pub label: String,
    pub time_control: String,
}

/// Lobby listing sent to one viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LobbyListing {
    pub joinable: Vec<JoinableSummary>,
    pub watchable: Vec<WatchableSummary>,
}
