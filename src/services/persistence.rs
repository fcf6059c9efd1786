//! Write-through mirror of session state into the document store.
//!
//! The hub never waits on storage: it queues operations on a channel and a single worker applies
//! them in order. A write that fails (or is skipped while degraded) marks the session dirty and is
//! re-attempted with the full document on the next operation for that session.

use std::{collections::HashSet, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{SessionDocument, SessionPatch},
        storage::StorageResult,
    },
    state::StoreSlot,
};

/// Operation queued for the persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    /// Insert a freshly created session.
    Create(SessionDocument),
    /// Merge `patch` into a stored session; `snapshot` is the full current document.
    Update {
        id: Uuid,
        patch: SessionPatch,
        snapshot: SessionDocument,
    },
}

impl PersistOp {
    fn session_id(&self) -> Uuid {
        match self {
            PersistOp::Create(document) => document.id,
            PersistOp::Update { id, .. } => *id,
        }
    }
}

/// Cheap handle used by the hub to queue writes.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistenceHandle {
    /// Spawn the worker writing to whatever store `slot` holds.
    pub fn spawn(slot: Arc<StoreSlot>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(PersistenceWorker::new(slot).run(rx));
        Self { tx }
    }

    /// Handle whose operations are only collected, for tests and tools.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<PersistOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn create(&self, document: SessionDocument) {
        self.queue(PersistOp::Create(document));
    }

    pub fn update(&self, id: Uuid, patch: SessionPatch, snapshot: SessionDocument) {
        self.queue(PersistOp::Update {
            id,
            patch,
            snapshot,
        });
    }

    fn queue(&self, op: PersistOp) {
        let session_id = op.session_id();
        if self.tx.send(op).is_err() {
            warn!(%session_id, "persistence worker stopped, write dropped");
        }
    }
}

struct PersistenceWorker {
    slot: Arc<StoreSlot>,
    created: HashSet<Uuid>,
    dirty: HashSet<Uuid>,
}

impl PersistenceWorker {
    fn new(slot: Arc<StoreSlot>) -> Self {
        Self {
            slot,
            created: HashSet::new(),
            dirty: HashSet::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
        while let Some(op) = rx.recv().await {
            self.apply(op).await;
        }
        debug!("persistence worker exiting");
    }

    async fn apply(&mut self, op: PersistOp) {
        let session_id = op.session_id();
        let Some(store) = self.slot.current().await else {
            debug!(%session_id, "no session store installed, keeping session dirty");
            self.dirty.insert(session_id);
            return;
        };

        let result: StorageResult<()> = match op {
            PersistOp::Create(document) => store.create(document).await.map(|_| ()),
            PersistOp::Update {
                id,
                patch,
                snapshot,
            } => {
                if !self.dirty.contains(&id) {
                    store.update(id, patch).await.map(|_| ())
                } else if self.created.contains(&id) {
                    store.update(id, SessionPatch::full(&snapshot)).await.map(|_| ())
                } else {
                    store.create(snapshot).await.map(|_| ())
                }
            }
        };

        match result {
            Ok(()) => {
                self.created.insert(session_id);
                if self.dirty.remove(&session_id) {
                    debug!(%session_id, "dirty session written back");
                }
            }
            Err(err) if err.is_unavailable() => {
                warn!(%session_id, error = %err, "session store unreachable, keeping session dirty");
                self.dirty.insert(session_id);
            }
            Err(err) => {
                warn!(%session_id, error = %err, "session write rejected, full document will be resent");
                self.dirty.insert(session_id);
            }
        }
    }
}
