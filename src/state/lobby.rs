//! Joinable and watchable session lists, kept in creation order.

use indexmap::IndexMap;

use crate::{
    dto::lobby::{JoinableSummary, LobbyListing, WatchableSummary},
    state::{ParticipantName, SessionId, session::TimeControl},
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct JoinableEntry {
    host: ParticipantName,
    time_control: TimeControl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchableEntry {
    label: String,
    players: [ParticipantName; 2],
    time_control: TimeControl,
}

/// Lobby lists. Mutated only by session lifecycle transitions in the hub.
#[derive(Debug, Default)]
pub struct Lobby {
    joinable: IndexMap<SessionId, JoinableEntry>,
    watchable: IndexMap<SessionId, WatchableEntry>,
}

impl Lobby {
    /// Create empty lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// List a freshly created session as joinable.
    ///
    /// A host has at most one joinable session: the earlier one is unlisted and returned.
    pub(crate) fn list_joinable(
        &mut self,
        session_id: SessionId,
        host: &str,
        time_control: TimeControl,
    ) -> Option<SessionId> {
        let evicted = self.unlist_host(host);
        self.watchable.shift_remove(&session_id);
        self.joinable.insert(
            session_id,
            JoinableEntry {
                host: host.to_string(),
                time_control,
            },
        );
        evicted
    }

    /// Drop the joinable entry hosted by `host`, returning its session.
    pub(crate) fn unlist_host(&mut self, host: &str) -> Option<SessionId> {
        let id = self
            .joinable
            .iter()
            .find(|(_, entry)| entry.host == host)
            .map(|(id, _)| *id)?;
        self.joinable.shift_remove(&id);
        Some(id)
    }

    /// Move a session that just got its second participant to the watchable list.
    pub(crate) fn promote(
        &mut self,
        session_id: SessionId,
        label: String,
        players: [ParticipantName; 2],
        time_control: TimeControl,
    ) {
        self.joinable.shift_remove(&session_id);
        self.watchable.insert(
            session_id,
            WatchableEntry {
                label,
                players,
                time_control,
            },
        );
    }

    /// Remove a session from both lists. Returns true if it was listed.
    pub(crate) fn close(&mut self, session_id: SessionId) -> bool {
        let joinable = self.joinable.shift_remove(&session_id).is_some();
        let watchable = self.watchable.shift_remove(&session_id).is_some();
        joinable || watchable
    }

    /// Whether the session is listed as joinable.
    pub fn is_joinable(&self, session_id: SessionId) -> bool {
        self.joinable.contains_key(&session_id)
    }

    /// Whether the session is listed as watchable.
    pub fn is_watchable(&self, session_id: SessionId) -> bool {
        self.watchable.contains_key(&session_id)
    }

    /// Listing for `viewer`: its own open session and the games it plays are left out.
    pub fn view_for(&self, viewer: &str) -> LobbyListing {
        self.listing(|host| host != viewer, |players| !players.iter().any(|p| p == viewer))
    }

    /// Unfiltered listing.
    pub fn view_all(&self) -> LobbyListing {
        self.listing(|_| true, |_| true)
    }

    fn listing(
        &self,
        keep_joinable: impl Fn(&str) -> bool,
        keep_watchable: impl Fn(&[ParticipantName; 2]) -> bool,
    ) -> LobbyListing {
        LobbyListing {
            joinable: self
                .joinable
                .iter()
                .filter(|(_, entry)| keep_joinable(&entry.host))
                .map(|(id, entry)| JoinableSummary {
                    session_id: *id,
                    host: entry.host.clone(),
                    time_control: entry.time_control.to_string(),
                })
                .collect(),
            watchable: self
                .watchable
                .iter()
                .filter(|(_, entry)| keep_watchable(&entry.players))
                .map(|(id, entry)| WatchableSummary {
                    session_id: *id,
                    label: entry.label.clone(),
                    time_control: entry.time_control.to_string(),
                })
                .collect(),
        }
    }
}
