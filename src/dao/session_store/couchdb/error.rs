//! Failures of the CouchDB session store.

use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Result alias of the CouchDB backend.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures while talking to CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request never got an answer, or its body could not be decoded.
    #[error("CouchDB request to `{path}` failed")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected CouchDB status {status} for `{path}`")]
    UnexpectedStatus { path: String, status: StatusCode },
    /// Another writer bumped `_rev` between our read and our write.
    #[error("revision conflict on `{path}`")]
    RevisionConflict { path: String },
    #[error("session `{id}` does not exist")]
    MissingDocument { id: Uuid },
}

impl CouchDaoError {
    pub(super) fn transport(path: &str) -> impl FnOnce(reqwest::Error) -> Self + '_ {
        move |source| CouchDaoError::Transport {
            path: path.to_string(),
            source,
        }
    }
}
