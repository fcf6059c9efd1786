//! Liveness acknowledgement records used to detect silent disconnects.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::state::{ParticipantName, SessionId};

/// Last acknowledgement per seated participant of one session.
#[derive(Debug, Default)]
struct SyncRecord {
    acks: HashMap<ParticipantName, Instant>,
}

/// Per-session liveness bookkeeping.
#[derive(Debug)]
pub struct TimeSyncBook {
    records: HashMap<SessionId, SyncRecord>,
    window: Duration,
}

impl TimeSyncBook {
    /// Create a book that presumes abandonment after `window` without acknowledgement.
    pub fn new(window: Duration) -> Self {
        Self {
            records: HashMap::new(),
            window,
        }
    }

    /// Start tracking `participants` of `session_id`, counting `now` as their first ack.
    pub fn begin<'a>(
        &mut self,
        session_id: SessionId,
        participants: impl IntoIterator<Item = &'a ParticipantName>,
        now: Instant,
    ) {
        let record = self.records.entry(session_id).or_default();
        for participant in participants {
            record.acks.entry(participant.clone()).or_insert(now);
        }
    }

    /// Record a liveness ack. Timestamps never move backwards.
    ///
    /// Returns false when the session or participant is not tracked.
    pub fn acknowledge(&mut self, session_id: SessionId, participant: &str, at: Instant) -> bool {
        let Some(last) = self
            .records
            .get_mut(&session_id)
            .and_then(|record| record.acks.get_mut(participant))
        else {
            return false;
        };
        *last = (*last).max(at);
        true
    }

    /// Participants of `session_id` whose last ack is older than the window at `now`.
    pub fn stale(&self, session_id: SessionId, now: Instant) -> Vec<ParticipantName> {
        let Some(record) = self.records.get(&session_id) else {
            return Vec::new();
        };
        let mut stale: Vec<_> = record
            .acks
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > self.window)
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();
        stale
    }

    /// Last ack of `participant`, if tracked.
    pub fn last_ack(&self, session_id: SessionId, participant: &str) -> Option<Instant> {
        self.records
            .get(&session_id)
            .and_then(|record| record.acks.get(participant).copied())
    }

    /// Stop tracking `session_id`. Returns true if it was tracked.
    pub fn end(&mut self, session_id: SessionId) -> bool {
        self.records.remove(&session_id).is_some()
    }

    /// Whether `session_id` is tracked.
    pub fn is_tracking(&self, session_id: SessionId) -> bool {
        self.records.contains_key(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn acknowledgements_never_move_backwards() {
        let mut book = TimeSyncBook::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let start = Instant::now();
        let alice = "alice".to_string();
        book.begin(id, [&alice], start);

        let later = start + Duration::from_secs(30);
        assert!(book.acknowledge(id, "alice", later));
        assert!(book.acknowledge(id, "alice", start));
        assert_eq!(book.last_ack(id, "alice"), Some(later));
        assert!(!book.acknowledge(id, "mallory", later));
    }

    #[test]
    fn only_gaps_beyond_the_window_are_stale() {
        let mut book = TimeSyncBook::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let start = Instant::now();
        let (alice, bob) = ("alice".to_string(), "bob".to_string());
        book.begin(id, [&alice, &bob], start);
        book.acknowledge(id, "bob", start + Duration::from_secs(50));

        assert!(book.stale(id, start + Duration::from_secs(60)).is_empty());
        assert_eq!(book.stale(id, start + Duration::from_secs(61)), vec![alice]);
        assert_eq!(
            book.stale(id, start + Duration::from_secs(200)),
            vec!["alice".to_string(), bob]
        );
    }

    #[test]
    fn ended_sessions_are_forgotten() {
        let mut book = TimeSyncBook::new(Duration::from_secs(1));
        let id = Uuid::new_v4();
        let alice = "alice".to_string();
        book.begin(id, [&alice], Instant::now());
        assert!(book.end(id));
        assert!(!book.end(id));
        assert!(!book.is_tracking(id));
        assert!(book.stale(id, Instant::now() + Duration::from_secs(10)).is_empty());
    }
}
