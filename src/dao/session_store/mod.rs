#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{SessionDocument, SessionPatch};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the document store mirroring session state.
///
/// The store is never a source of truth while the process lives: the hub writes through it and
/// only reads back sessions that are no longer held in memory.
pub trait SessionStore: Send + Sync {
    /// Insert a new session document, returning its identifier.
    fn create(&self, document: SessionDocument) -> BoxFuture<'static, StorageResult<Uuid>>;
    /// Fetch a session document.
    fn read(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionDocument>>>;
    /// Merge `patch` into an existing document and return the merged result.
    fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionDocument>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
