use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::SessionDocument;

pub const SESSION_PREFIX: &str = "session::";

/// Session document as stored in CouchDB: the body plus `_id`/`_rev` bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionDocument,
}

impl CouchSessionDocument {
    pub fn new(session: SessionDocument, rev: Option<String>) -> Self {
        Self {
            id: session_doc_id(session.id),
            rev,
            session,
        }
    }

    pub fn into_document(self) -> SessionDocument {
        self.session
    }
}

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}
