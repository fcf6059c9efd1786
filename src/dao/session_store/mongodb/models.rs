use mongodb::bson::{Binary, Bson, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{SessionDocument, SessionPatch, SessionResultEntity, SessionStatus};

/// Storage shape of a session: `_id` key and BSON timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    host: String,
    white: Option<String>,
    black: Option<String>,
    base_seconds: u32,
    increment_seconds: u32,
    position: String,
    #[serde(default)]
    history: Vec<String>,
    status: SessionStatus,
    #[serde(default)]
    started: bool,
    #[serde(default)]
    finished: bool,
    result: Option<SessionResultEntity>,
    white_remaining: i64,
    black_remaining: i64,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<SessionDocument> for MongoSessionDocument {
    fn from(value: SessionDocument) -> Self {
        Self {
            id: value.id,
            host: value.host,
            white: value.white,
            black: value.black,
            base_seconds: value.base_seconds,
            increment_seconds: value.increment_seconds,
            position: value.position,
            history: value.history,
            status: value.status,
            started: value.started,
            finished: value.finished,
            result: value.result,
            white_remaining: value.white_remaining,
            black_remaining: value.black_remaining,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionDocument {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            id: value.id,
            host: value.host,
            white: value.white,
            black: value.black,
            base_seconds: value.base_seconds,
            increment_seconds: value.increment_seconds,
            position: value.position,
            history: value.history,
            status: value.status,
            started: value.started,
            finished: value.finished,
            result: value.result,
            white_remaining: value.white_remaining,
            black_remaining: value.black_remaining,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

fn status_name(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Open => "open",
        SessionStatus::Active => "active",
        SessionStatus::Finished => "finished",
    }
}

/// Translate a patch into a `$set` document. Absent fields are not written.
pub fn set_document(patch: SessionPatch) -> Document {
    let mut set = Document::new();
    if let Some(white) = patch.white {
        set.insert("white", white);
    }
    if let Some(black) = patch.black {
        set.insert("black", black);
    }
    if let Some(position) = patch.position {
        set.insert("position", position);
    }
    if let Some(history) = patch.history {
        set.insert(
            "history",
            history.into_iter().map(Bson::String).collect::<Vec<_>>(),
        );
    }
    if let Some(status) = patch.status {
        set.insert("status", status_name(status));
    }
    if let Some(started) = patch.started {
        set.insert("started", started);
    }
    if let Some(finished) = patch.finished {
        set.insert("finished", finished);
    }
    if let Some(result) = patch.result {
        let winner = result.winner.map(Bson::String).unwrap_or(Bson::Null);
        set.insert("result", doc! {"kind": result.kind.as_str(), "winner": winner});
    }
    if let Some(remaining) = patch.white_remaining {
        set.insert("white_remaining", remaining);
    }
    if let Some(remaining) = patch.black_remaining {
        set.insert("black_remaining", remaining);
    }
    let updated_at = patch
        .updated_at
        .map(DateTime::from_system_time)
        .unwrap_or_else(DateTime::now);
    set.insert("updated_at", updated_at);
    set
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}
