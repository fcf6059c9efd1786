//! Process-local store, used when no database is configured and by tests.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{SessionDocument, SessionPatch},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Session store keeping documents in a concurrent map.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    documents: Arc<DashMap<Uuid, SessionDocument>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, document: SessionDocument) -> BoxFuture<'static, StorageResult<Uuid>> {
        let documents = self.documents.clone();
        Box::pin(async move {
            let id = document.id;
            documents.insert(id, document);
            Ok(id)
        })
    }

    fn read(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionDocument>>> {
        let documents = self.documents.clone();
        Box::pin(async move { Ok(documents.get(&id).map(|entry| entry.value().clone())) })
    }

    fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionDocument>> {
        let documents = self.documents.clone();
        Box::pin(async move {
            let mut entry = documents
                .get_mut(&id)
                .ok_or(StorageError::Missing { id })?;
            entry.merge(patch);
            Ok(entry.value().clone())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
