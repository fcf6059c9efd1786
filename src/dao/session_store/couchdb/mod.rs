mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchSessionStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::MissingDocument { id } => StorageError::Missing { id },
            CouchDaoError::RevisionConflict { path } => StorageError::Conflict { key: path },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
