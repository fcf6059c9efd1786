//! Binding between transport connections and participant identities, plus room membership.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    dto::ws::OutboundMessage,
    state::{ConnectionId, ParticipantName, SessionId},
};

/// Sender half feeding a connection's socket writer.
pub type Outbound = mpsc::UnboundedSender<OutboundMessage>;

/// Logical identity of a player or viewer, kept across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Display name, unique per process.
    pub name: ParticipantName,
    /// Live connection, if any.
    pub connection: Option<ConnectionId>,
    /// Session restored on reattachment.
    pub current_session: Option<SessionId>,
}

/// Room reaching exactly one participant through one specific connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrivateRoom {
    pub participant: ParticipantName,
    pub connection: ConnectionId,
    pub session_id: SessionId,
}

/// Result of an identity claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// The participant record already existed.
    pub returning: bool,
    /// Connection that lost the binding to the new one.
    pub superseded: Option<ConnectionId>,
}

/// Owner of every connection binding and room.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Outbound>,
    bindings: HashMap<ConnectionId, ParticipantName>,
    participants: HashMap<ParticipantName, Participant>,
    rooms: HashMap<SessionId, HashSet<ConnectionId>>,
    private_rooms: HashSet<PrivateRoom>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened transport connection.
    pub fn attach(&mut self, connection: ConnectionId, outbound: Outbound) {
        self.connections.insert(connection, outbound);
    }

    /// Bind `connection` to `name`, creating the participant on first use.
    ///
    /// A name already bound elsewhere moves to the new connection; the old connection keeps its
    /// transport but loses the identity and its rooms.
    pub fn claim(&mut self, connection: ConnectionId, name: &str) -> Claim {
        if let Some(previous_name) = self.bindings.get(&connection).cloned()
            && previous_name != name
        {
            self.unbind(connection);
        }

        let returning = self.participants.contains_key(name);
        let participant = self
            .participants
            .entry(name.to_string())
            .or_insert_with(|| Participant {
                name: name.to_string(),
                connection: None,
                current_session: None,
            });

        let superseded = participant
            .connection
            .replace(connection)
            .filter(|old| *old != connection);
        if let Some(old) = superseded {
            self.bindings.remove(&old);
            self.drop_rooms_of(old);
            debug!(participant = %name, connection_id = %old, "identity moved to a new connection");
        }
        self.bindings.insert(connection, name.to_string());

        Claim {
            returning,
            superseded,
        }
    }

    /// Forget a closed connection. The participant keeps its session association.
    pub fn detach(&mut self, connection: ConnectionId) -> Option<ParticipantName> {
        self.connections.remove(&connection);
        self.unbind(connection)
    }

    /// Destroy the participant record bound to `connection`.
    pub fn logout(&mut self, connection: ConnectionId) -> Option<Participant> {
        let name = self.unbind(connection)?;
        self.participants.remove(&name)
    }

    /// Participant bound to `connection`.
    pub fn participant_for(&self, connection: ConnectionId) -> Option<&ParticipantName> {
        self.bindings.get(&connection)
    }

    /// Participant record by name.
    pub fn participant(&self, name: &str) -> Option<&Participant> {
        self.participants.get(name)
    }

    /// Mutable participant record by name.
    pub fn participant_mut(&mut self, name: &str) -> Option<&mut Participant> {
        self.participants.get_mut(name)
    }

    /// Identified participants with a live connection.
    pub fn connected(&self) -> impl Iterator<Item = (&ParticipantName, ConnectionId)> {
        self.bindings
            .iter()
            .map(|(connection, name)| (name, *connection))
    }

    /// Add the participant's live connection to the session room and its private room.
    ///
    /// Returns false when the participant is not connected.
    pub fn enter_room(&mut self, session_id: SessionId, name: &str) -> bool {
        let Some(connection) = self
            .participants
            .get(name)
            .and_then(|participant| participant.connection)
        else {
            return false;
        };
        self.rooms.entry(session_id).or_default().insert(connection);
        self.private_rooms.insert(PrivateRoom {
            participant: name.to_string(),
            connection,
            session_id,
        });
        true
    }

    /// Connections currently in the session room.
    pub fn room_members(&self, session_id: SessionId) -> Vec<ConnectionId> {
        self.rooms
            .get(&session_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the participant's current connection has a private room for `session_id`.
    pub fn has_private_room(&self, session_id: SessionId, name: &str) -> bool {
        self.private_room(session_id, name).is_some()
    }

    /// Push `message` to every connection in the session room.
    pub fn send_to_session(&self, session_id: SessionId, message: &OutboundMessage) {
        let Some(members) = self.rooms.get(&session_id) else {
            return;
        };
        for connection in members {
            self.send_to_connection(*connection, message.clone());
        }
    }

    /// Push `message` to the participant through its private room for `session_id`.
    ///
    /// Nothing is sent when the private room belongs to a connection that has been replaced.
    pub fn send_to_participant(
        &self,
        session_id: SessionId,
        name: &str,
        message: OutboundMessage,
    ) -> bool {
        match self.private_room(session_id, name) {
            Some(room) => self.send_to_connection(room.connection, message),
            None => false,
        }
    }

    /// Push `message` to one connection, identified or not.
    pub fn send_to_connection(&self, connection: ConnectionId, message: OutboundMessage) -> bool {
        match self.connections.get(&connection) {
            Some(outbound) => {
                if outbound.send(message).is_err() {
                    warn!(connection_id = %connection, "writer closed, dropping message");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    fn private_room(&self, session_id: SessionId, name: &str) -> Option<PrivateRoom> {
        let connection = self.participants.get(name)?.connection?;
        let room = PrivateRoom {
            participant: name.to_string(),
            connection,
            session_id,
        };
        self.private_rooms.contains(&room).then_some(room)
    }

    fn unbind(&mut self, connection: ConnectionId) -> Option<ParticipantName> {
        let name = self.bindings.remove(&connection)?;
        if let Some(participant) = self.participants.get_mut(&name)
            && participant.connection == Some(connection)
        {
            participant.connection = None;
        }
        self.drop_rooms_of(connection);
        Some(name)
    }

    fn drop_rooms_of(&mut self, connection: ConnectionId) {
        self.rooms.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
        self.private_rooms
            .retain(|room| room.connection != connection);
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn connect(
        registry: &mut ConnectionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.attach(id, tx);
        (id, rx)
    }

    fn ping() -> OutboundMessage {
        OutboundMessage::Error {
            code: "test".into(),
            message: "ping".into(),
        }
    }

    #[test]
    fn late_claim_moves_the_identity_to_the_new_connection() {
        let mut registry = ConnectionRegistry::new();
        let (first, _rx1) = connect(&mut registry);
        let (second, _rx2) = connect(&mut registry);

        let claim = registry.claim(first, "alice");
        assert!(!claim.returning);
        assert_eq!(claim.superseded, None);

        let claim = registry.claim(second, "alice");
        assert!(claim.returning);
        assert_eq!(claim.superseded, Some(first));
        assert_eq!(registry.participant_for(first), None);
        assert_eq!(
            registry.participant_for(second).map(String::as_str),
            Some("alice")
        );
        assert_eq!(registry.participant("alice").unwrap().connection, Some(second));
    }

    #[test]
    fn detach_keeps_the_session_association() {
        let mut registry = ConnectionRegistry::new();
        let (connection, _rx) = connect(&mut registry);
        let session = Uuid::new_v4();
        registry.claim(connection, "alice");
        registry.participant_mut("alice").unwrap().current_session = Some(session);
        assert!(registry.enter_room(session, "alice"));

        assert_eq!(registry.detach(connection).as_deref(), Some("alice"));
        let participant = registry.participant("alice").unwrap();
        assert_eq!(participant.connection, None);
        assert_eq!(participant.current_session, Some(session));
        assert!(registry.room_members(session).is_empty());
        assert!(!registry.has_private_room(session, "alice"));
    }

    #[test]
    fn stale_connection_never_receives_private_messages() {
        let mut registry = ConnectionRegistry::new();
        let (old, mut old_rx) = connect(&mut registry);
        let (new, mut new_rx) = connect(&mut registry);
        let session = Uuid::new_v4();

        registry.claim(old, "alice");
        registry.enter_room(session, "alice");
        registry.claim(new, "alice");

        // The new connection has not re-entered the room yet.
        assert!(!registry.send_to_participant(session, "alice", ping()));
        registry.enter_room(session, "alice");
        assert!(registry.send_to_participant(session, "alice", ping()));

        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn session_broadcast_reaches_every_member() {
        let mut registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&mut registry);
        let (b, mut rx_b) = connect(&mut registry);
        let (_c, mut rx_c) = connect(&mut registry);
        let session = Uuid::new_v4();
        registry.claim(a, "alice");
        registry.claim(b, "bob");
        registry.enter_room(session, "alice");
        registry.enter_room(session, "bob");

        registry.send_to_session(session, &ping());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn logout_destroys_the_participant() {
        let mut registry = ConnectionRegistry::new();
        let (connection, _rx) = connect(&mut registry);
        registry.claim(connection, "alice");
        assert!(registry.logout(connection).is_some());
        assert!(registry.participant("alice").is_none());
        assert_eq!(registry.connected().count(), 0);
    }
}
