pub mod clock;
pub mod lobby;
pub mod registry;
pub mod session;
pub mod time_sync;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    services::{
        coordinator::{self, HubHandle},
        persistence::PersistenceHandle,
        rules::ChessOracle,
        timers::TokioTimers,
    },
};

/// Identifier of a game session.
pub type SessionId = Uuid;
/// Identifier of one transport connection.
pub type ConnectionId = Uuid;
/// Display name identifying a participant.
pub type ParticipantName = String;

/// Application state shared across handlers.
pub type SharedState = Arc<AppState>;

/// Currently installed session store plus the degraded flag derived from it.
pub struct StoreSlot {
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
}

impl StoreSlot {
    /// Empty slot. The application starts degraded until a store is installed.
    pub fn new() -> Arc<Self> {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn current(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}

/// Central application state shared by the HTTP and WebSocket handlers.
pub struct AppState {
    store: Arc<StoreSlot>,
    hub: HubHandle,
    config: Arc<AppConfig>,
}

impl AppState {
    /// Build the state and spawn the session coordinator and the persistence worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig) -> SharedState {
        let config = Arc::new(config);
        let store = StoreSlot::new();
        let persistence = PersistenceHandle::spawn(store.clone());
        let hub = coordinator::spawn(
            config.clone(),
            Arc::new(ChessOracle::new()),
            persistence,
            |commands| TokioTimers::new(commands, &config),
        );
        Arc::new(Self { store, hub, config })
    }

    /// Slot holding the session store.
    pub fn store(&self) -> &Arc<StoreSlot> {
        &self.store
    }

    /// Handle to the session coordinator.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    #[tokio::test]
    async fn slot_tracks_degraded_mode() {
        let slot = StoreSlot::new();
        let mut watcher = slot.watcher();
        assert!(slot.is_degraded().await);

        slot.install(Arc::new(MemorySessionStore::new())).await;
        assert!(!slot.is_degraded().await);
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        slot.clear().await;
        assert!(slot.is_degraded().await);
        assert!(*watcher.borrow_and_update());
    }
}
