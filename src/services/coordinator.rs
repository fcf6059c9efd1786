//! Single serialized control flow around the [`SessionHub`].
//!
//! Socket handlers, REST handlers and timer tasks never touch session state directly; they send
//! [`HubCommand`]s and one task applies them in arrival order.

use std::sync::Arc;

use tokio::sync::{
    mpsc::{self, WeakUnboundedSender},
    oneshot,
};
use tracing::{debug, error, warn};

use crate::{
    config::AppConfig,
    dto::{lobby::LobbyListing, session::SessionSnapshot, ws::InboundMessage},
    error::ServiceError,
    services::{
        hub::SessionHub, persistence::PersistenceHandle, rules::RulesOracle, timers::TimerDriver,
    },
    state::{ConnectionId, SessionId, clock::ClockKey, registry::Outbound},
};

/// Work item processed by the coordinator.
#[derive(Debug)]
pub enum HubCommand {
    /// A transport connection was opened.
    Connect {
        connection: ConnectionId,
        outbound: Outbound,
    },
    /// A validated frame from a connection.
    Inbound {
        connection: ConnectionId,
        message: InboundMessage,
    },
    /// A transport connection was closed.
    Disconnect { connection: ConnectionId },
    /// One decrement of a running clock.
    ClockTick { key: ClockKey, generation: u64 },
    /// Clock-sync broadcast period elapsed.
    SyncTick(SessionId),
    /// Liveness check period elapsed.
    LivenessCheck(SessionId),
    /// Read the current state of a session.
    Snapshot {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    /// Read the unfiltered lobby.
    Lobby { reply: oneshot::Sender<LobbyListing> },
}

/// Cloneable sender side of the coordinator.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Register a connection and the channel feeding its socket writer.
    pub fn connect(&self, connection: ConnectionId, outbound: Outbound) -> bool {
        self.send(HubCommand::Connect {
            connection,
            outbound,
        })
    }

    /// Forward a validated inbound frame.
    pub fn inbound(&self, connection: ConnectionId, message: InboundMessage) -> bool {
        self.send(HubCommand::Inbound {
            connection,
            message,
        })
    }

    /// Report a closed connection.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        self.send(HubCommand::Disconnect { connection })
    }

    /// Current state of a session held in memory.
    pub async fn snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionSnapshot>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.request(HubCommand::Snapshot { session_id, reply }, rx)
            .await
    }

    /// Unfiltered lobby listing.
    pub async fn lobby(&self) -> Result<LobbyListing, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.request(HubCommand::Lobby { reply }, rx).await
    }

    async fn request<T>(
        &self,
        command: HubCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, ServiceError> {
        if !self.send(command) {
            return Err(ServiceError::Internal("session coordinator stopped".into()));
        }
        rx.await
            .map_err(|_| ServiceError::Internal("session coordinator dropped the request".into()))
    }

    fn send(&self, command: HubCommand) -> bool {
        if self.tx.send(command).is_err() {
            warn!("session coordinator stopped, command dropped");
            return false;
        }
        true
    }
}

/// Spawn the coordinator task. `make_timers` receives a weak sender so timer tasks never keep the
/// coordinator alive on their own.
pub fn spawn<D, F>(
    config: Arc<AppConfig>,
    oracle: Arc<dyn RulesOracle>,
    persistence: PersistenceHandle,
    make_timers: F,
) -> HubHandle
where
    D: TimerDriver + Send + 'static,
    F: FnOnce(WeakUnboundedSender<HubCommand>) -> D,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let timers = make_timers(tx.downgrade());
    let hub = SessionHub::new(&config, oracle, persistence, timers);
    tokio::spawn(run(hub, rx));
    HubHandle { tx }
}

async fn run<D: TimerDriver>(mut hub: SessionHub<D>, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    while let Some(command) = rx.recv().await {
        let now = tokio::time::Instant::now().into_std();
        dispatch(&mut hub, command, now);
    }
    debug!("session coordinator exiting");
}

fn dispatch<D: TimerDriver>(hub: &mut SessionHub<D>, command: HubCommand, now: std::time::Instant) {
    match command {
        HubCommand::Connect {
            connection,
            outbound,
        } => hub.connect(connection, outbound),
        HubCommand::Inbound {
            connection,
            message,
        } => {
            if let Err(err) = hub.handle(connection, message, now) {
                if err.is_fault() {
                    error!(connection_id = %connection, error = %err, "internal fault while handling message");
                } else {
                    warn!(connection_id = %connection, error = %err, "rejected message");
                }
                hub.report_error(connection, &err);
            }
        }
        HubCommand::Disconnect { connection } => hub.disconnect(connection),
        HubCommand::ClockTick { key, generation } => hub.tick_clock(&key, generation),
        HubCommand::SyncTick(session_id) => hub.sync_tick(session_id),
        HubCommand::LivenessCheck(session_id) => hub.liveness_check(session_id, now),
        HubCommand::Snapshot { session_id, reply } => {
            let _ = reply.send(hub.snapshot(session_id));
        }
        HubCommand::Lobby { reply } => {
            let _ = reply.send(hub.lobby_overview());
        }
    }
}
