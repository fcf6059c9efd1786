use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationError;

use crate::{
    dto::{
        lobby::LobbyListing,
        session::{ClockSnapshot, MoveSummary, SessionSnapshot},
        validation::validate_display_name,
    },
    error::ServiceError,
    state::session::{ResultKind, Side},
};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Messages accepted from participant WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Claim a display name. Must be the first frame of a connection.
    Identify { name: String },
    /// Ask for the viewer-filtered lobby.
    RequestLobby,
    /// Open a session. `side` defaults to a random seat.
    CreateSession {
        time_control: String,
        #[serde(default)]
        side: Option<Side>,
    },
    JoinSession { session_id: Uuid },
    SubmitMove {
        session_id: Uuid,
        #[serde(rename = "move")]
        mv: String,
    },
    Resign { session_id: Uuid },
    /// Liveness acknowledgement for the participant's current session.
    AckLiveness,
    /// Confirms receipt of the latest move broadcast of a session.
    AckMove { session_id: Uuid },
    /// Opaque payload relayed to the session room.
    Annotate { session_id: Uuid, payload: Value },
    RequestState { session_id: Uuid },
    /// Forget the participant identity.
    Logout,
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse and validate an inbound text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ServiceError> {
        let message: Self = serde_json::from_str(text)
            .map_err(|err| ServiceError::InvalidInput(format!("malformed message: {err}")))?;
        message.validate().map_err(|err| {
            ServiceError::InvalidInput(
                err.message
                    .map(|message| message.into_owned())
                    .unwrap_or_else(|| err.code.into_owned()),
            )
        })?;
        Ok(message)
    }

    /// Field-level checks that do not depend on runtime configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Identify { name } => validate_display_name(name),
            Self::Unknown => Err(ValidationError::new("unknown_message")
                .with_message("unknown message type".into())),
            _ => Ok(()),
        }
    }

    /// Display name carried by an identity claim.
    pub fn identification_name(&self) -> Option<&str> {
        match self {
            Self::Identify { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// Messages pushed to participant WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    IdentityConfirmed {
        name: String,
        /// True when the name was already known to the server.
        returning: bool,
    },
    LobbyListing(LobbyListing),
    SessionCreated { session: SessionSnapshot },
    SessionJoined {
        session: SessionSnapshot,
        is_spectator: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
    },
    StateUpdated { session: SessionSnapshot },
    MoveBroadcast(MoveSummary),
    Termination {
        session_id: Uuid,
        result: ResultKind,
        winner: Option<String>,
    },
    ClockSync {
        session_id: Uuid,
        clocks: ClockSnapshot,
    },
    Annotation {
        session_id: Uuid,
        from: String,
        payload: Value,
    },
    Error { code: String, message: String },
}

impl OutboundMessage {
    /// Build the error frame reported to the originating connection.
    pub fn error(err: &ServiceError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}
