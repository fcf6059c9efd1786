//! Periodic activities of the hub: clock decrements, clock-sync broadcasts and liveness checks.
//!
//! Timer tasks carry identifiers only. Each firing is turned into a [`HubCommand`] and the hub
//! looks the clock or session up again when it processes it, so a timer that fires after its
//! session finished finds nothing to act on.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use tokio::{
    sync::mpsc::WeakUnboundedSender,
    task::AbortHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::debug;

use crate::{
    config::AppConfig,
    services::coordinator::HubCommand,
    state::{SessionId, clock::ClockKey},
};

/// Scheduling seam between the hub and the runtime.
pub trait TimerDriver {
    /// Run the decrement loop of `key`, tagging each tick with `generation`.
    fn start_clock(&mut self, key: ClockKey, generation: u64);
    /// Cancel the decrement loop of `key`, if any.
    fn stop_clock(&mut self, key: &ClockKey);
    /// Run the clock-sync broadcast and the liveness check of a session.
    fn start_session_loops(&mut self, session_id: SessionId);
    /// Cancel both periodic activities of a session.
    fn stop_session_loops(&mut self, session_id: SessionId);
}

/// Timer driver backed by Tokio tasks.
pub struct TokioTimers {
    commands: WeakUnboundedSender<HubCommand>,
    clock_tick: Duration,
    sync_interval: Duration,
    liveness_check_interval: Duration,
    clocks: HashMap<ClockKey, AbortHandle>,
    loops: HashMap<SessionId, [AbortHandle; 2]>,
}

impl TokioTimers {
    /// Driver sending its firings to `commands`, with periods taken from `config`.
    pub fn new(commands: WeakUnboundedSender<HubCommand>, config: &AppConfig) -> Self {
        Self {
            commands,
            clock_tick: config.clock_tick,
            sync_interval: config.sync_interval,
            liveness_check_interval: config.liveness_check_interval,
            clocks: HashMap::new(),
            loops: HashMap::new(),
        }
    }

    /// Spawn a task sending `make()` every `period`, first after one full period.
    ///
    /// The task ends on its own once the coordinator is gone.
    fn every(
        &self,
        period: Duration,
        make: impl Fn() -> HubCommand + Send + 'static,
    ) -> AbortHandle {
        let commands = self.commands.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(make()).is_err() {
                    break;
                }
            }
        });
        task.abort_handle()
    }
}

impl TimerDriver for TokioTimers {
    fn start_clock(&mut self, key: ClockKey, generation: u64) {
        let tick_key = key.clone();
        let handle = self.every(self.clock_tick, move || HubCommand::ClockTick {
            key: tick_key.clone(),
            generation,
        });
        if let Some(previous) = self.clocks.insert(key, handle) {
            previous.abort();
        }
    }

    fn stop_clock(&mut self, key: &ClockKey) {
        if let Some(handle) = self.clocks.remove(key) {
            handle.abort();
        }
    }

    fn start_session_loops(&mut self, session_id: SessionId) {
        let sync = self.every(self.sync_interval, move || HubCommand::SyncTick(session_id));
        let liveness = self.every(self.liveness_check_interval, move || {
            HubCommand::LivenessCheck(session_id)
        });
        if let Some(previous) = self.loops.insert(session_id, [sync, liveness]) {
            previous.iter().for_each(AbortHandle::abort);
        }
        debug!(%session_id, "session loops started");
    }

    fn stop_session_loops(&mut self, session_id: SessionId) {
        if let Some(handles) = self.loops.remove(&session_id) {
            handles.iter().for_each(AbortHandle::abort);
            debug!(%session_id, "session loops cancelled");
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.clocks.values().for_each(AbortHandle::abort);
        self.loops.values().flatten().for_each(AbortHandle::abort);
    }
}

/// Timer driver that only records what is scheduled. Tests fire ticks by hand.
#[derive(Debug, Default)]
pub struct ManualTimers {
    clocks: HashMap<ClockKey, u64>,
    loops: HashSet<SessionId>,
    clock_starts: usize,
}

impl ManualTimers {
    /// Driver with nothing scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the scheduled loop of `key`.
    pub fn clock_generation(&self, key: &ClockKey) -> Option<u64> {
        self.clocks.get(key).copied()
    }

    /// Number of scheduled decrement loops.
    pub fn clock_count(&self) -> usize {
        self.clocks.len()
    }

    /// Number of decrement loops ever scheduled.
    pub fn clock_starts(&self) -> usize {
        self.clock_starts
    }

    /// Whether the session loops of `session_id` are scheduled.
    pub fn has_session_loops(&self, session_id: SessionId) -> bool {
        self.loops.contains(&session_id)
    }
}

impl TimerDriver for ManualTimers {
    fn start_clock(&mut self, key: ClockKey, generation: u64) {
        self.clock_starts += 1;
        self.clocks.insert(key, generation);
    }

    fn stop_clock(&mut self, key: &ClockKey) {
        self.clocks.remove(key);
    }

    fn start_session_loops(&mut self, session_id: SessionId) {
        self.loops.insert(session_id);
    }

    fn stop_session_loops(&mut self, session_id: SessionId) {
        self.loops.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn fast_config() -> AppConfig {
        AppConfig {
            clock_tick: Duration::from_millis(10),
            sync_interval: Duration::from_millis(10),
            liveness_check_interval: Duration::from_millis(10),
            ..AppConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clock_loop_sends_tagged_ticks_until_stopped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TokioTimers::new(tx.downgrade(), &fast_config());
        let key = ClockKey::new(Uuid::new_v4(), "alice");

        timers.start_clock(key.clone(), 7);
        let command = rx.recv().await.unwrap();
        assert!(matches!(
            command,
            HubCommand::ClockTick { key: ref k, generation: 7 } if *k == key
        ));

        timers.stop_clock(&key);
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(command) = rx.try_recv() {
            // At most the tick already queued before the abort.
            assert!(matches!(command, HubCommand::ClockTick { .. }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_clock_replaces_its_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TokioTimers::new(tx.downgrade(), &fast_config());
        let key = ClockKey::new(Uuid::new_v4(), "alice");

        timers.start_clock(key.clone(), 1);
        timers.start_clock(key.clone(), 2);
        tokio::time::sleep(Duration::from_millis(35)).await;

        let mut generations = Vec::new();
        while let Ok(HubCommand::ClockTick { generation, .. }) = rx.try_recv() {
            generations.push(generation);
        }
        assert!(!generations.is_empty());
        assert!(generations.iter().all(|generation| *generation == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn session_loops_are_cancelled_together() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TokioTimers::new(tx.downgrade(), &fast_config());
        let session_id = Uuid::new_v4();

        timers.start_session_loops(session_id);
        tokio::time::sleep(Duration::from_millis(15)).await;
        let mut saw_sync = false;
        let mut saw_liveness = false;
        while let Ok(command) = rx.try_recv() {
            match command {
                HubCommand::SyncTick(id) if id == session_id => saw_sync = true,
                HubCommand::LivenessCheck(id) if id == session_id => saw_liveness = true,
                _ => {}
            }
        }
        assert!(saw_sync && saw_liveness);

        timers.stop_session_loops(session_id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
