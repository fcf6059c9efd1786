use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::session::ResultKind;

/// Lifecycle status stored with a session document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for the second seat.
    Open,
    /// Both seats filled.
    Active,
    /// Result recorded.
    Finished,
}

/// Persisted result of a finished session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResultEntity {
    /// Termination kind.
    pub kind: ResultKind,
    /// Winning participant, absent for draws and neutral terminations.
    pub winner: Option<String>,
}

/// Session document mirrored to the document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDocument {
    /// Primary key of the session.
    pub id: Uuid,
    /// Participant that created the session.
    pub host: String,
    /// White seat occupant.
    pub white: Option<String>,
    /// Black seat occupant.
    pub black: Option<String>,
    /// Base clock in seconds.
    pub base_seconds: u32,
    /// Increment in seconds.
    pub increment_seconds: u32,
    /// Board after the last move (FEN).
    pub position: String,
    /// Accepted moves in UCI notation.
    pub history: Vec<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// True once black replied to the first move.
    pub started: bool,
    /// True once a result is recorded.
    pub finished: bool,
    /// Result of a finished session.
    pub result: Option<SessionResultEntity>,
    /// Remaining clock units of the white seat.
    pub white_remaining: i64,
    /// Remaining clock units of the black seat.
    pub black_remaining: i64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last update timestamp.
    pub updated_at: SystemTime,
}

/// Field-level update of a [`SessionDocument`]. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SessionResultEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<SystemTime>,
}

impl SessionPatch {
    /// Patch overwriting every mutable field with the values of `document`.
    pub fn full(document: &SessionDocument) -> Self {
        Self {
            white: document.white.clone(),
            black: document.black.clone(),
            position: Some(document.position.clone()),
            history: Some(document.history.clone()),
            status: Some(document.status),
            started: Some(document.started),
            finished: Some(document.finished),
            result: document.result.clone(),
            white_remaining: Some(document.white_remaining),
            black_remaining: Some(document.black_remaining),
            updated_at: Some(document.updated_at),
        }
    }

    /// True when the patch carries no field.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl SessionDocument {
    /// Merge the fields present in `patch` into this document.
    pub fn merge(&mut self, patch: SessionPatch) {
        let SessionPatch {
            white,
            black,
            position,
            history,
            status,
            started,
            finished,
            result,
            white_remaining,
            black_remaining,
            updated_at,
        } = patch;

        if white.is_some() {
            self.white = white;
        }
        if black.is_some() {
            self.black = black;
        }
        if let Some(position) = position {
            self.position = position;
        }
        if let Some(history) = history {
            self.history = history;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(started) = started {
            self.started = started;
        }
        if let Some(finished) = finished {
            self.finished = finished;
        }
        if result.is_some() {
            self.result = result;
        }
        if let Some(remaining) = white_remaining {
            self.white_remaining = remaining;
        }
        if let Some(remaining) = black_remaining {
            self.black_remaining = remaining;
        }
        self.updated_at = updated_at.unwrap_or_else(SystemTime::now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionDocument {
        let now = SystemTime::now();
        SessionDocument {
            id: Uuid::new_v4(),
            host: "alice".into(),
            white: Some("alice".into()),
            black: None,
            base_seconds: 300,
            increment_seconds: 0,
            position: "start".into(),
            history: Vec::new(),
            status: SessionStatus::Open,
            started: false,
            finished: false,
            result: None,
            white_remaining: 300,
            black_remaining: 300,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn merge_only_touches_present_fields() {
        let mut doc = sample();
        doc.merge(SessionPatch {
            black: Some("bob".into()),
            status: Some(SessionStatus::Active),
            ..SessionPatch::default()
        });
        assert_eq!(doc.black.as_deref(), Some("bob"));
        assert_eq!(doc.white.as_deref(), Some("alice"));
        assert_eq!(doc.status, SessionStatus::Active);
        assert_eq!(doc.position, "start");
    }

    #[test]
    fn full_patch_reproduces_the_document() {
        let mut source = sample();
        source.history = vec!["e2e4".into()];
        source.finished = true;
        source.result = Some(SessionResultEntity {
            kind: ResultKind::Resignation,
            winner: Some("alice".into()),
        });

        let mut target = sample();
        target.id = source.id;
        target.created_at = source.created_at;
        target.merge(SessionPatch::full(&source));
        assert_eq!(target, source);
    }
}
