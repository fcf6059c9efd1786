use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{SessionDocument, SessionStatus},
    dto::format_system_time,
    state::session::{ResultKind, Session, SessionPhase, Side},
};

/// Remaining clock units of both seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClockSnapshot {
    /// Remaining units of the white seat (`-1` once expired).
    pub white: i64,
    /// Remaining units of the black seat (`-1` once expired).
    pub black: i64,
}

/// Result payload attached to finished sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionResultSummary {
    /// Termination kind.
    pub kind: ResultKind,
    /// Winning participant, absent for draws.
    pub winner: Option<String>,
}

/// Full state of a session as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub host: String,
    pub white: Option<String>,
    pub black: Option<String>,
    /// Time control in `minutes+increment` form.
    pub time_control: String,
    pub status: SessionStatus,
    /// True once black has replied to the first move.
    pub started: bool,
    /// Serialized board (FEN).
    pub position: String,
    /// Accepted moves in UCI notation.
    pub history: Vec<String>,
    pub clocks: ClockSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResultSummary>,
    pub updated_at: String,
}

impl SessionSnapshot {
    /// Build a snapshot from the canonical session and its current clock readings.
    pub fn from_session(session: &Session, clocks: ClockSnapshot) -> Self {
        Self {
            id: session.id,
            host: session.host.clone(),
            white: session.white.clone(),
            black: session.black.clone(),
            time_control: session.time_control.to_string(),
            status: SessionStatus::from(session.phase()),
            started: session.is_started(),
            position: session.position.clone(),
            history: session.history.clone(),
            clocks,
            result: session.result.as_ref().map(|result| SessionResultSummary {
                kind: result.kind,
                winner: result.winner.clone(),
            }),
            updated_at: format_system_time(session.updated_at),
        }
    }
}

impl From<SessionDocument> for SessionSnapshot {
    fn from(doc: SessionDocument) -> Self {
        let minutes = doc.base_seconds / 60;
        Self {
            id: doc.id,
            host: doc.host,
            white: doc.white,
            black: doc.black,
            time_control: format!("{minutes}+{}", doc.increment_seconds),
            status: doc.status,
            started: doc.started,
            position: doc.position,
            history: doc.history,
            clocks: ClockSnapshot {
                white: doc.white_remaining,
                black: doc.black_remaining,
            },
            result: doc.result.map(|result| SessionResultSummary {
                kind: result.kind,
                winner: result.winner,
            }),
            updated_at: format_system_time(doc.updated_at),
        }
    }
}

impl From<SessionPhase> for SessionStatus {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Open => SessionStatus::Open,
            SessionPhase::Active(_) => SessionStatus::Active,
            SessionPhase::Finished => SessionStatus::Finished,
        }
    }
}

/// Details of the latest accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MoveSummary {
    pub session_id: Uuid,
    /// Move in UCI notation.
    #[serde(rename = "move")]
    pub mv: String,
    /// Board after the move (FEN).
    pub position: String,
    /// Number of half-moves played including this one.
    pub ply: usize,
    /// Seat that played the move.
    pub by: Side,
}

impl MoveSummary {
    /// Latest move of `session`, if any move was played.
    pub fn latest(session: &Session) -> Option<Self> {
        let mv = session.history.last()?.clone();
        let ply = session.history.len();
        Some(Self {
            session_id: session.id,
            mv,
            position: session.position.clone(),
            ply,
            by: Side::to_move_after(ply - 1),
        })
    }
}
