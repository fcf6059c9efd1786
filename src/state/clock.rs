//! Per-participant countdown clocks keyed by (participant, session).

use std::collections::HashMap;

use crate::state::{ParticipantName, SessionId};

/// Reading reported once a clock has run past zero.
///
/// Zero is still a valid reading (the last one before expiry), so the floor sits one unit below.
pub const EXPIRED: i64 = -1;

/// Identifies one participant's clock inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClockKey {
    /// Session the clock belongs to.
    pub session_id: SessionId,
    /// Participant owning the clock.
    pub participant: ParticipantName,
}

impl ClockKey {
    /// Build a key for `participant` in `session_id`.
    pub fn new(session_id: SessionId, participant: impl Into<ParticipantName>) -> Self {
        Self {
            session_id,
            participant: participant.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ClockEntry {
    remaining: i64,
    running: bool,
    generation: u64,
}

/// Outcome of a decrement tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The tick did not belong to a running clock (stopped, restarted or unknown).
    Ignored,
    /// The clock kept running with the given remaining units.
    Running(i64),
    /// The clock crossed zero on this tick. Reported once per expiry.
    Expired,
}

/// Owner of every clock entry.
#[derive(Debug, Default)]
pub struct ClockBook {
    entries: HashMap<ClockKey, ClockEntry>,
}

impl ClockBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stopped clock with `remaining` units. Existing entries are left untouched.
    pub fn insert(&mut self, key: ClockKey, remaining: i64) {
        self.entries.entry(key).or_insert(ClockEntry {
            remaining,
            running: false,
            generation: 0,
        });
    }

    /// Start the clock. Returns the generation of the new decrement loop, or `None`
    /// when the clock is unknown, already running or already expired.
    pub fn start(&mut self, key: &ClockKey) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        if entry.running || entry.remaining <= EXPIRED {
            return None;
        }
        entry.running = true;
        entry.generation += 1;
        Some(entry.generation)
    }

    /// Stop the clock. Returns true if it was running.
    pub fn stop(&mut self, key: &ClockKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.running => {
                entry.running = false;
                true
            }
            _ => false,
        }
    }

    /// Apply one tick of the loop identified by `generation`.
    ///
    /// Ticks from a loop that has since been stopped or replaced are ignored, so a late
    /// tick can never double-decrement a restarted clock.
    pub fn decrement(&mut self, key: &ClockKey, generation: u64) -> Tick {
        let Some(entry) = self.entries.get_mut(key) else {
            return Tick::Ignored;
        };
        if !entry.running || entry.generation != generation {
            return Tick::Ignored;
        }

        entry.remaining = (entry.remaining - 1).max(EXPIRED);
        if entry.remaining == EXPIRED {
            entry.running = false;
            Tick::Expired
        } else {
            Tick::Running(entry.remaining)
        }
    }

    /// Add `units` to a clock that has not expired.
    pub fn credit(&mut self, key: &ClockKey, units: i64) {
        if let Some(entry) = self.entries.get_mut(key)
            && entry.remaining > EXPIRED
        {
            entry.remaining += units;
        }
    }

    /// Remaining units, if the clock exists.
    pub fn remaining(&self, key: &ClockKey) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.remaining)
    }

    /// Whether the clock currently has a decrement loop.
    pub fn is_running(&self, key: &ClockKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.running)
    }

    /// Number of running clocks across all sessions.
    pub fn running_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.running).count()
    }
}
