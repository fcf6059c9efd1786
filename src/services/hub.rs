//! Owner of every live session, clock, room and lobby list.
//!
//! The hub is plain synchronous state. The coordinator task feeds it one command at a time, so
//! every operation observes and leaves a consistent view; races between a clock tick and a move
//! or resignation resolve to "first finalize wins".

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use serde_json::Value;
use tracing::{debug, info, warn};
use validator::ValidationError;

use crate::{
    config::AppConfig,
    dao::models::{SessionDocument, SessionPatch, SessionResultEntity, SessionStatus},
    dto::{
        lobby::LobbyListing,
        session::{ClockSnapshot, MoveSummary, SessionSnapshot},
        validation::{validate_display_name, validate_time_control},
        ws::{InboundMessage, OutboundMessage},
    },
    error::ServiceError,
    services::{
        persistence::PersistenceHandle,
        rules::{Outcome, RulesOracle},
        timers::TimerDriver,
    },
    state::{
        ConnectionId, ParticipantName, SessionId,
        clock::{ClockBook, ClockKey, Tick},
        lobby::Lobby,
        registry::{ConnectionRegistry, Outbound},
        session::{
            PlayStatus, ResultKind, Session, SessionPhase, SessionResult, Side, TimeControl,
            TimeControlParseError,
        },
        time_sync::TimeSyncBook,
    },
};

/// Coordinator of sessions, clocks, rooms and lobby lists.
pub struct SessionHub<D> {
    sessions: HashMap<SessionId, Session>,
    clocks: ClockBook,
    sync: TimeSyncBook,
    registry: ConnectionRegistry,
    lobby: Lobby,
    /// Pending-move markers: false while a participant has not acknowledged the latest move.
    acknowledged: HashMap<(ParticipantName, SessionId), bool>,
    /// Participants that were away when their session finished.
    unreported: HashSet<(ParticipantName, SessionId)>,
    oracle: Arc<dyn RulesOracle>,
    persistence: PersistenceHandle,
    timers: D,
    max_base_minutes: u32,
    max_increment_secs: u32,
}

impl<D: TimerDriver> SessionHub<D> {
    /// Empty hub scheduling its periodic work on `timers`.
    pub fn new(
        config: &AppConfig,
        oracle: Arc<dyn RulesOracle>,
        persistence: PersistenceHandle,
        timers: D,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            clocks: ClockBook::new(),
            sync: TimeSyncBook::new(config.liveness_window),
            registry: ConnectionRegistry::new(),
            lobby: Lobby::new(),
            acknowledged: HashMap::new(),
            unreported: HashSet::new(),
            oracle,
            persistence,
            timers,
            max_base_minutes: config.max_base_minutes,
            max_increment_secs: config.max_increment_secs,
        }
    }

    /// Register a freshly opened connection.
    pub fn connect(&mut self, connection: ConnectionId, outbound: Outbound) {
        self.registry.attach(connection, outbound);
        debug!(connection_id = %connection, "connection attached");
    }

    /// Forget a closed connection. The participant and its session association survive.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        match self.registry.detach(connection) {
            Some(name) => info!(participant = %name, connection_id = %connection, "participant disconnected"),
            None => debug!(connection_id = %connection, "anonymous connection closed"),
        }
    }

    /// Apply one inbound frame.
    pub fn handle(
        &mut self,
        connection: ConnectionId,
        message: InboundMessage,
        now: Instant,
    ) -> Result<(), ServiceError> {
        match message {
            InboundMessage::Identify { name } => self.identify(connection, name, now),
            InboundMessage::RequestLobby => self.request_lobby(connection),
            InboundMessage::CreateSession { time_control, side } => {
                self.create(connection, &time_control, side).map(|_| ())
            }
            InboundMessage::JoinSession { session_id } => self.join(connection, session_id, now),
            InboundMessage::SubmitMove { session_id, mv } => {
                self.apply_move(connection, session_id, &mv)
            }
            InboundMessage::Resign { session_id } => self.resign(connection, session_id),
            InboundMessage::AckLiveness => self.ack_liveness(connection, now),
            InboundMessage::AckMove { session_id } => self.ack_move(connection, session_id),
            InboundMessage::Annotate {
                session_id,
                payload,
            } => self.annotate(connection, session_id, payload),
            InboundMessage::RequestState { session_id } => {
                self.request_state(connection, session_id)
            }
            InboundMessage::Logout => self.logout(connection),
            InboundMessage::Unknown => Err(ServiceError::InvalidInput(
                "unknown message type".into(),
            )),
        }
    }

    /// Send an error frame to `connection`.
    pub fn report_error(&self, connection: ConnectionId, err: &ServiceError) {
        self.registry
            .send_to_connection(connection, OutboundMessage::error(err));
    }

    /// Bind `name` to `connection` and restore its session, replaying what it missed.
    pub fn identify(
        &mut self,
        connection: ConnectionId,
        name: ParticipantName,
        now: Instant,
    ) -> Result<(), ServiceError> {
        validate_display_name(&name).map_err(invalid_input)?;
        let claim = self.registry.claim(connection, &name);
        if let Some(previous) = claim.superseded {
            info!(participant = %name, connection_id = %connection, previous_connection = %previous, "identity moved to a new connection");
        }

        self.registry.send_to_connection(
            connection,
            OutboundMessage::IdentityConfirmed {
                name: name.clone(),
                returning: claim.returning,
            },
        );
        self.registry.send_to_connection(
            connection,
            OutboundMessage::LobbyListing(self.lobby.view_for(&name)),
        );
        self.restore(&name, now);
        Ok(())
    }

    fn restore(&mut self, name: &str, now: Instant) {
        let Some(session_id) = self
            .registry
            .participant(name)
            .and_then(|participant| participant.current_session)
        else {
            return;
        };
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };

        self.registry.enter_room(session_id, name);
        let side = session.seat_of(name);
        let snapshot = session_snapshot(&self.clocks, session);
        self.registry.send_to_participant(
            session_id,
            name,
            OutboundMessage::SessionJoined {
                session: snapshot.clone(),
                is_spectator: side.is_none(),
                side,
            },
        );

        if session.is_finished() {
            if !self.unreported.remove(&(name.to_string(), session_id)) {
                debug!(participant = %name, %session_id, "result already delivered");
            } else if let Some(result) = &session.result {
                self.registry.send_to_participant(
                    session_id,
                    name,
                    OutboundMessage::Termination {
                        session_id,
                        result: result.kind,
                        winner: result.winner.clone(),
                    },
                );
                self.registry.send_to_participant(
                    session_id,
                    name,
                    OutboundMessage::ClockSync {
                        session_id,
                        clocks: clock_snapshot(&self.clocks, session),
                    },
                );
            }
        } else if side.is_some() {
            self.sync.acknowledge(session_id, name, now);
        }

        let marker = (name.to_string(), session_id);
        if self.acknowledged.get(&marker) == Some(&false) {
            if let Some(summary) = MoveSummary::latest(session) {
                debug!(participant = %name, %session_id, ply = summary.ply, "replaying missed move");
                self.registry.send_to_participant(
                    session_id,
                    name,
                    OutboundMessage::MoveBroadcast(summary),
                );
                self.registry.send_to_participant(
                    session_id,
                    name,
                    OutboundMessage::StateUpdated { session: snapshot },
                );
            }
            self.acknowledged.insert(marker, true);
        }

        info!(participant = %name, %session_id, spectator = side.is_none(), "participant restored to session");
    }

    fn request_lobby(&mut self, connection: ConnectionId) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        self.registry.send_to_connection(
            connection,
            OutboundMessage::LobbyListing(self.lobby.view_for(&name)),
        );
        Ok(())
    }

    /// Open a session hosted by the participant bound to `connection`.
    pub fn create(
        &mut self,
        connection: ConnectionId,
        time_control: &str,
        side: Option<Side>,
    ) -> Result<SessionId, ServiceError> {
        let name = self.identity(connection)?;
        let time_control: TimeControl = time_control
            .parse()
            .map_err(|err: TimeControlParseError| ServiceError::InvalidInput(err.to_string()))?;
        validate_time_control(&time_control, self.max_base_minutes, self.max_increment_secs)
            .map_err(invalid_input)?;
        if let Some(current) = self.playing_session(&name) {
            return Err(ServiceError::InvalidState(format!(
                "already playing in session {current}"
            )));
        }

        let host_side = side.unwrap_or_else(Side::random);
        let session = Session::open(
            name.clone(),
            host_side,
            time_control,
            self.oracle.initial_position(),
        );
        let session_id = session.id;

        if let Some(evicted) = self.lobby.list_joinable(session_id, &name, time_control) {
            debug!(participant = %name, %evicted, "earlier open session unlisted");
        }
        self.persistence
            .create(session_document(&self.clocks, &session));
        let snapshot = session_snapshot(&self.clocks, &session);
        self.sessions.insert(session_id, session);

        self.attach(&name, session_id, true);
        self.registry.send_to_participant(
            session_id,
            &name,
            OutboundMessage::SessionCreated { session: snapshot },
        );
        self.broadcast_lobby();

        info!(host = %name, %session_id, %time_control, side = ?host_side, "session created");
        Ok(session_id)
    }

    /// Seat the participant on the empty side, or attach it as a spectator.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        session_id: SessionId,
        now: Instant,
    ) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        if !self.sessions.contains_key(&session_id) {
            return Err(session_not_found(session_id));
        }
        let playing = self.playing_session(&name);
        let listed = self.lobby.is_joinable(session_id);
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;

        if let Some(side) = session.seat_of(&name) {
            let snapshot = session_snapshot(&self.clocks, session);
            let make_current = playing.is_none_or(|current| current == session_id);
            self.attach(&name, session_id, make_current);
            self.registry.send_to_participant(
                session_id,
                &name,
                OutboundMessage::SessionJoined {
                    session: snapshot,
                    is_spectator: false,
                    side: Some(side),
                },
            );
            return Ok(());
        }

        // One seat per participant, and only listed sessions take a new player.
        let seated_elsewhere = playing.is_some_and(|current| current != session_id);
        if seated_elsewhere || !listed || !session.is_joinable_by(&name) {
            return self.spectate(&name, session_id);
        }

        let side = session.fill_seat(name.clone())?;
        let (Some(white), Some(black)) = (session.white.clone(), session.black.clone()) else {
            return Err(ServiceError::Internal(format!(
                "session {session_id} activated with an empty seat"
            )));
        };
        let base = i64::from(session.time_control.base_seconds);
        self.clocks.insert(ClockKey::new(session_id, white.clone()), base);
        self.clocks.insert(ClockKey::new(session_id, black.clone()), base);
        self.lobby.promote(
            session_id,
            session.label(),
            [white.clone(), black.clone()],
            session.time_control,
        );
        if let Some(withdrawn) = self.lobby.unlist_host(&name) {
            debug!(participant = %name, session_id = %withdrawn, "open session unlisted, host took a seat elsewhere");
        }
        self.sync.begin(session_id, [&white, &black], now);
        self.timers.start_session_loops(session_id);

        let patch = SessionPatch {
            white: Some(white),
            black: Some(black),
            status: Some(SessionStatus::Active),
            updated_at: Some(session.updated_at),
            ..SessionPatch::default()
        };
        self.persistence.update(
            session_id,
            patch,
            session_document(&self.clocks, session),
        );
        let snapshot = session_snapshot(&self.clocks, session);

        self.attach(&name, session_id, true);
        self.registry.send_to_participant(
            session_id,
            &name,
            OutboundMessage::SessionJoined {
                session: snapshot.clone(),
                is_spectator: false,
                side: Some(side),
            },
        );
        self.registry.send_to_session(
            session_id,
            &OutboundMessage::StateUpdated { session: snapshot },
        );
        self.broadcast_lobby();

        info!(participant = %name, %session_id, ?side, "session activated");
        Ok(())
    }

    fn spectate(&mut self, name: &str, session_id: SessionId) -> Result<(), ServiceError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        session.spectators.insert(name.to_string());
        let snapshot = session_snapshot(&self.clocks, session);

        // A spectated game never displaces the game the participant is playing.
        let displace = self.playing_session(name).is_none();
        self.attach(name, session_id, displace);
        self.registry.send_to_participant(
            session_id,
            name,
            OutboundMessage::SessionJoined {
                session: snapshot,
                is_spectator: true,
                side: None,
            },
        );

        debug!(participant = %name, %session_id, "spectator attached");
        Ok(())
    }

    /// Validate and apply a move, then finalize the session if the position is terminal.
    pub fn apply_move(
        &mut self,
        connection: ConnectionId,
        session_id: SessionId,
        candidate: &str,
    ) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;

        if session.is_finished() {
            return Err(ServiceError::InvalidState(format!(
                "session {session_id} is finished"
            )));
        }
        let side = session.seat_of(&name).ok_or_else(|| {
            ServiceError::Unauthorized(format!("not seated in session {session_id}"))
        })?;
        let SessionPhase::Active(status) = session.phase() else {
            return Err(ServiceError::InvalidState(
                "waiting for an opponent to join".into(),
            ));
        };
        if session.side_to_move() != side {
            return Err(ServiceError::InvalidState("not your turn".into()));
        }

        let legal = self.oracle.legalize(&session.history, candidate)?;
        let was_started = status == PlayStatus::Ongoing;
        let ends_grace = session.record_move(legal.notation, legal.position)?;

        let mover = ClockKey::new(session_id, name.clone());
        self.clocks.stop(&mover);
        self.timers.stop_clock(&mover);
        if was_started {
            self.clocks
                .credit(&mover, i64::from(session.time_control.increment_seconds));
        }
        if (was_started || ends_grace)
            && let Some(opponent) = session.opponent_of(&name)
        {
            let key = ClockKey::new(session_id, opponent.clone());
            if let Some(generation) = self.clocks.start(&key) {
                self.timers.start_clock(key, generation);
            }
        }

        for viewer in session.seated().chain(session.spectators.iter()) {
            self.acknowledged
                .insert((viewer.clone(), session_id), *viewer == name);
        }

        let clocks = clock_snapshot(&self.clocks, session);
        let patch = SessionPatch {
            position: Some(session.position.clone()),
            history: Some(session.history.clone()),
            started: ends_grace.then_some(true),
            white_remaining: Some(clocks.white),
            black_remaining: Some(clocks.black),
            updated_at: Some(session.updated_at),
            ..SessionPatch::default()
        };
        self.persistence.update(
            session_id,
            patch,
            session_document(&self.clocks, session),
        );

        if let Some(summary) = MoveSummary::latest(session) {
            self.registry
                .send_to_session(session_id, &OutboundMessage::MoveBroadcast(summary));
        }
        self.registry.send_to_session(
            session_id,
            &OutboundMessage::StateUpdated {
                session: session_snapshot(&self.clocks, session),
            },
        );
        debug!(participant = %name, %session_id, ply = session.history.len(), "move applied");

        let verdict = match self.oracle.outcome(&session.history)? {
            None => None,
            Some(Outcome::Checkmate { winner }) => {
                Some((ResultKind::Checkmate, session.player(winner).cloned()))
            }
            Some(Outcome::Draw(kind)) => Some((kind, None)),
        };
        if let Some((kind, winner)) = verdict {
            self.finalize(session_id, kind, winner);
        }
        Ok(())
    }

    /// Resign the seat held by the participant bound to `connection`.
    pub fn resign(
        &mut self,
        connection: ConnectionId,
        session_id: SessionId,
    ) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        if session.is_finished() {
            return Err(ServiceError::InvalidState(format!(
                "session {session_id} is finished"
            )));
        }
        if session.seat_of(&name).is_none() {
            return Err(ServiceError::Unauthorized(
                "only seated participants may resign".into(),
            ));
        }

        let winner = session.opponent_of(&name).cloned();
        info!(participant = %name, %session_id, "participant resigned");
        self.finalize(session_id, ResultKind::Resignation, winner);
        Ok(())
    }

    /// Shared termination path. Returns false when the session was already finished.
    pub fn finalize(
        &mut self,
        session_id: SessionId,
        kind: ResultKind,
        winner: Option<ParticipantName>,
    ) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if session.is_finished() {
            debug!(%session_id, "session already finished, ignoring finalize");
            return false;
        }
        if let Err(err) = session.finish(SessionResult {
            kind,
            winner: winner.clone(),
        }) {
            warn!(%session_id, error = %err, "cannot finalize session");
            return false;
        }

        self.registry.send_to_session(
            session_id,
            &OutboundMessage::Termination {
                session_id,
                result: kind,
                winner: winner.clone(),
            },
        );
        for viewer in session.seated().chain(session.spectators.iter()) {
            if !self.registry.has_private_room(session_id, viewer) {
                self.unreported.insert((viewer.clone(), session_id));
            }
        }

        for player in session.seated() {
            let key = ClockKey::new(session_id, player.clone());
            self.clocks.stop(&key);
            self.timers.stop_clock(&key);
        }
        self.sync.end(session_id);
        self.timers.stop_session_loops(session_id);

        let clocks = clock_snapshot(&self.clocks, session);
        let patch = SessionPatch {
            status: Some(SessionStatus::Finished),
            finished: Some(true),
            result: Some(SessionResultEntity {
                kind,
                winner: winner.clone(),
            }),
            white_remaining: Some(clocks.white),
            black_remaining: Some(clocks.black),
            updated_at: Some(session.updated_at),
            ..SessionPatch::default()
        };
        self.persistence.update(
            session_id,
            patch,
            session_document(&self.clocks, session),
        );

        self.lobby.close(session_id);
        self.registry.send_to_session(
            session_id,
            &OutboundMessage::ClockSync { session_id, clocks },
        );
        info!(%session_id, result = kind.as_str(), winner = ?winner, "session finished");

        self.broadcast_lobby();
        true
    }

    /// One decrement of the clock `key` from the loop tagged `generation`.
    pub fn tick_clock(&mut self, key: &ClockKey, generation: u64) {
        let finished = self
            .sessions
            .get(&key.session_id)
            .is_none_or(Session::is_finished);
        if finished {
            self.clocks.stop(key);
            self.timers.stop_clock(key);
            return;
        }

        if let Tick::Expired = self.clocks.decrement(key, generation) {
            self.timers.stop_clock(key);
            let winner = self
                .sessions
                .get(&key.session_id)
                .and_then(|session| session.opponent_of(&key.participant))
                .cloned();
            info!(session_id = %key.session_id, participant = %key.participant, "clock expired");
            self.finalize(key.session_id, ResultKind::Ontime, winner);
        }
    }

    /// Broadcast both clock readings to the session room.
    pub fn sync_tick(&mut self, session_id: SessionId) {
        match self.sessions.get(&session_id) {
            Some(session) if !session.is_finished() => {
                self.registry.send_to_session(
                    session_id,
                    &OutboundMessage::ClockSync {
                        session_id,
                        clocks: clock_snapshot(&self.clocks, session),
                    },
                );
            }
            _ => self.timers.stop_session_loops(session_id),
        }
    }

    /// Terminate the session by abandonment when a seated participant went silent.
    pub fn liveness_check(&mut self, session_id: SessionId, now: Instant) {
        let Some(session) = self
            .sessions
            .get(&session_id)
            .filter(|session| !session.is_finished())
        else {
            self.timers.stop_session_loops(session_id);
            return;
        };

        let stale = self.sync.stale(session_id, now);
        let winner = match stale.as_slice() {
            [] => return,
            [silent] => session.opponent_of(silent).cloned(),
            _ => None,
        };
        warn!(%session_id, ?stale, "liveness window exceeded");
        self.finalize(session_id, ResultKind::Abandonment, winner);
    }

    fn ack_liveness(&mut self, connection: ConnectionId, now: Instant) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        if let Some(session_id) = self.current_session(&name) {
            self.sync.acknowledge(session_id, &name, now);
        }
        Ok(())
    }

    fn ack_move(&mut self, connection: ConnectionId, session_id: SessionId) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        if let Some(flag) = self.acknowledged.get_mut(&(name, session_id)) {
            *flag = true;
        }
        Ok(())
    }

    fn annotate(
        &mut self,
        connection: ConnectionId,
        session_id: SessionId,
        payload: Value,
    ) -> Result<(), ServiceError> {
        let name = self.identity(connection)?;
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        if session.seat_of(&name).is_none() && !session.spectators.contains(&name) {
            return Err(ServiceError::Unauthorized(format!(
                "not attached to session {session_id}"
            )));
        }
        self.registry.send_to_session(
            session_id,
            &OutboundMessage::Annotation {
                session_id,
                from: name,
                payload,
            },
        );
        Ok(())
    }

    fn request_state(
        &mut self,
        connection: ConnectionId,
        session_id: SessionId,
    ) -> Result<(), ServiceError> {
        self.identity(connection)?;
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        self.registry.send_to_connection(
            connection,
            OutboundMessage::StateUpdated {
                session: session_snapshot(&self.clocks, session),
            },
        );
        Ok(())
    }

    fn logout(&mut self, connection: ConnectionId) -> Result<(), ServiceError> {
        let participant = self
            .registry
            .logout(connection)
            .ok_or_else(|| ServiceError::Unauthorized("not identified".into()))?;
        self.acknowledged
            .retain(|(name, _), _| *name != participant.name);
        self.unreported.retain(|(name, _)| *name != participant.name);
        info!(participant = %participant.name, "participant logged out");
        Ok(())
    }

    /// Current state of a session.
    pub fn snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        self.sessions
            .get(&session_id)
            .map(|session| session_snapshot(&self.clocks, session))
    }

    /// Unfiltered lobby, used by the REST surface.
    pub fn lobby_overview(&self) -> LobbyListing {
        self.lobby.view_all()
    }

    /// Session by identifier.
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Clock readings of every session.
    pub fn clocks(&self) -> &ClockBook {
        &self.clocks
    }

    /// Joinable and watchable lists.
    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// Connection bindings and rooms.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Liveness records of active sessions.
    pub fn time_sync(&self) -> &TimeSyncBook {
        &self.sync
    }

    /// Timer driver in use.
    pub fn timers(&self) -> &D {
        &self.timers
    }

    /// Whether `name` acknowledged the latest move of `session_id`.
    pub fn has_acknowledged(&self, name: &str, session_id: SessionId) -> Option<bool> {
        self.acknowledged
            .get(&(name.to_string(), session_id))
            .copied()
    }

    fn identity(&self, connection: ConnectionId) -> Result<ParticipantName, ServiceError> {
        self.registry
            .participant_for(connection)
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("identify before sending other messages".into()))
    }

    fn current_session(&self, name: &str) -> Option<SessionId> {
        self.registry
            .participant(name)
            .and_then(|participant| participant.current_session)
    }

    /// Unfinished active session in which `name` holds a seat.
    fn playing_session(&self, name: &str) -> Option<SessionId> {
        let session_id = self.current_session(name)?;
        let session = self.sessions.get(&session_id)?;
        let playing = matches!(session.phase(), SessionPhase::Active(_))
            && session.seat_of(name).is_some();
        playing.then_some(session_id)
    }

    /// Put `name` in the session rooms, optionally making it its current session.
    fn attach(&mut self, name: &str, session_id: SessionId, make_current: bool) {
        if make_current && let Some(participant) = self.registry.participant_mut(name) {
            participant.current_session = Some(session_id);
        }
        self.registry.enter_room(session_id, name);
        // A late attacher still owes an acknowledgement of the move played before it arrived.
        let behind = self
            .sessions
            .get(&session_id)
            .is_some_and(|session| !session.history.is_empty());
        self.acknowledged
            .entry((name.to_string(), session_id))
            .or_insert(!behind);
    }

    fn broadcast_lobby(&self) {
        for (name, connection) in self.registry.connected() {
            self.registry.send_to_connection(
                connection,
                OutboundMessage::LobbyListing(self.lobby.view_for(name)),
            );
        }
    }
}

fn session_not_found(session_id: SessionId) -> ServiceError {
    ServiceError::NotFound(format!("session {session_id}"))
}

fn invalid_input(err: ValidationError) -> ServiceError {
    ServiceError::InvalidInput(
        err.message
            .map(|message| message.into_owned())
            .unwrap_or_else(|| err.code.into_owned()),
    )
}

fn clock_snapshot(clocks: &ClockBook, session: &Session) -> ClockSnapshot {
    let reading = |side: Side| {
        session
            .player(side)
            .and_then(|name| clocks.remaining(&ClockKey::new(session.id, name.clone())))
            .unwrap_or(i64::from(session.time_control.base_seconds))
    };
    ClockSnapshot {
        white: reading(Side::White),
        black: reading(Side::Black),
    }
}

fn session_snapshot(clocks: &ClockBook, session: &Session) -> SessionSnapshot {
    SessionSnapshot::from_session(session, clock_snapshot(clocks, session))
}

fn session_document(clocks: &ClockBook, session: &Session) -> SessionDocument {
    let readings = clock_snapshot(clocks, session);
    SessionDocument {
        id: session.id,
        host: session.host.clone(),
        white: session.white.clone(),
        black: session.black.clone(),
        base_seconds: session.time_control.base_seconds,
        increment_seconds: session.time_control.increment_seconds,
        position: session.position.clone(),
        history: session.history.clone(),
        status: SessionStatus::from(session.phase()),
        started: session.is_started(),
        finished: session.is_finished(),
        result: session.result.as_ref().map(|result| SessionResultEntity {
            kind: result.kind,
            winner: result.winner.clone(),
        }),
        white_remaining: readings.white,
        black_remaining: readings.black,
        created_at: session.created_at,
        updated_at: session.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use uuid::Uuid;

    use super::*;
    use crate::{
        dto::lobby::LobbyListing,
        services::{persistence::PersistOp, rules::ChessOracle, timers::ManualTimers},
    };

    struct Client {
        connection: ConnectionId,
        rx: UnboundedReceiver<OutboundMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<OutboundMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    struct Fixture {
        hub: SessionHub<ManualTimers>,
        persisted: UnboundedReceiver<PersistOp>,
        t0: Instant,
    }

    impl Fixture {
        fn new() -> Self {
            let (persistence, persisted) = PersistenceHandle::detached();
            Self {
                hub: SessionHub::new(
                    &AppConfig::default(),
                    Arc::new(ChessOracle::new()),
                    persistence,
                    ManualTimers::new(),
                ),
                persisted,
                t0: Instant::now(),
            }
        }

        /// Open a connection and identify, keeping every frame received.
        fn connect_as(&mut self, name: &str) -> Client {
            let connection = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            self.hub.connect(connection, tx);
            self.hub
                .identify(connection, name.to_string(), self.t0)
                .unwrap();
            Client { connection, rx }
        }

        fn client(&mut self, name: &str) -> Client {
            let mut client = self.connect_as(name);
            client.drain();
            client
        }

        fn reconnect(&mut self, client: Client, name: &str) -> Client {
            self.hub.disconnect(client.connection);
            self.connect_as(name)
        }

        fn create(&mut self, host: &Client, time_control: &str, side: Side) -> SessionId {
            self.hub
                .create(host.connection, time_control, Some(side))
                .unwrap()
        }

        fn join(&mut self, client: &Client, session_id: SessionId) {
            self.hub
                .join(client.connection, session_id, self.t0)
                .unwrap();
        }

        fn play(&mut self, client: &Client, session_id: SessionId, mv: &str) {
            self.hub
                .apply_move(client.connection, session_id, mv)
                .unwrap();
        }

        /// Fire one tick of the scheduled loop of `name`'s clock.
        fn tick(&mut self, session_id: SessionId, name: &str) {
            let key = ClockKey::new(session_id, name);
            let generation = self
                .hub
                .timers()
                .clock_generation(&key)
                .expect("clock loop scheduled");
            self.hub.tick_clock(&key, generation);
        }

        fn remaining(&self, session_id: SessionId, name: &str) -> Option<i64> {
            self.hub
                .clocks()
                .remaining(&ClockKey::new(session_id, name))
        }

        fn persisted(&mut self) -> Vec<PersistOp> {
            let mut ops = Vec::new();
            while let Ok(op) = self.persisted.try_recv() {
                ops.push(op);
            }
            ops
        }

        /// alice hosts as black, bob joins as white and moves first.
        fn playing(&mut self, time_control: &str) -> (Client, Client, SessionId) {
            let mut alice = self.client("alice");
            let mut bob = self.client("bob");
            let session_id = self.create(&alice, time_control, Side::Black);
            self.join(&bob, session_id);
            alice.drain();
            bob.drain();
            (alice, bob, session_id)
        }
    }

    fn count(messages: &[OutboundMessage], matches: impl Fn(&OutboundMessage) -> bool) -> usize {
        messages.iter().filter(|message| matches(message)).count()
    }

    fn terminations(messages: &[OutboundMessage]) -> usize {
        count(messages, |m| matches!(m, OutboundMessage::Termination { .. }))
    }

    fn last_lobby(messages: &[OutboundMessage]) -> Option<LobbyListing> {
        messages.iter().rev().find_map(|message| match message {
            OutboundMessage::LobbyListing(listing) => Some(listing.clone()),
            _ => None,
        })
    }

    #[test]
    fn created_session_is_listed_for_everyone_but_its_host() {
        let mut fx = Fixture::new();
        let mut alice = fx.client("alice");
        let mut bob = fx.client("bob");
        let session_id = fx.create(&alice, "5+0", Side::White);

        assert!(fx.hub.lobby().is_joinable(session_id));
        let alice_messages = alice.drain();
        assert_eq!(
            count(&alice_messages, |m| matches!(m, OutboundMessage::SessionCreated { .. })),
            1
        );
        assert!(last_lobby(&alice_messages).unwrap().joinable.is_empty());
        let bob_view = last_lobby(&bob.drain()).unwrap();
        assert_eq!(bob_view.joinable.len(), 1);
        assert_eq!(bob_view.joinable[0].session_id, session_id);
        assert_eq!(bob_view.joinable[0].time_control, "5+0");

        assert!(matches!(fx.persisted().as_slice(), [PersistOp::Create(doc)] if doc.id == session_id));
    }

    #[test]
    fn second_open_session_unlists_the_first() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        let first = fx.create(&alice, "5+0", Side::White);
        let second = fx.create(&alice, "3+2", Side::Black);

        assert!(!fx.hub.lobby().is_joinable(first));
        assert!(fx.hub.lobby().is_joinable(second));
        assert_eq!(fx.hub.session(first).unwrap().phase(), SessionPhase::Open);
        assert_eq!(fx.hub.lobby_overview().joinable.len(), 1);
    }

    #[test]
    fn create_rejects_bad_requests() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        assert!(matches!(
            fx.hub.create(alice.connection, "0+0", None),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.hub.create(alice.connection, "500+0", None),
            Err(ServiceError::InvalidInput(_))
        ));

        let stranger = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        fx.hub.connect(stranger, tx);
        assert!(matches!(
            fx.hub.create(stranger, "5+0", None),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.hub.handle(stranger, InboundMessage::RequestLobby, fx.t0),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn seated_participant_cannot_open_another_session() {
        let mut fx = Fixture::new();
        let (alice, _bob, _session_id) = fx.playing("5+0");
        assert!(matches!(
            fx.hub.create(alice.connection, "5+0", None),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn join_activates_the_session() {
        let mut fx = Fixture::new();
        let mut alice = fx.client("alice");
        let mut bob = fx.client("bob");
        let session_id = fx.create(&alice, "5+0", Side::Black);
        alice.drain();
        fx.join(&bob, session_id);

        let session = fx.hub.session(session_id).unwrap();
        assert_eq!(session.phase(), SessionPhase::Active(PlayStatus::Grace));
        assert_eq!(session.seat_of("bob"), Some(Side::White));
        assert!(fx.hub.lobby().is_watchable(session_id));
        assert!(!fx.hub.lobby().is_joinable(session_id));
        assert_eq!(fx.remaining(session_id, "alice"), Some(300));
        assert_eq!(fx.remaining(session_id, "bob"), Some(300));
        assert_eq!(fx.hub.clocks().running_count(), 0);
        assert!(fx.hub.timers().has_session_loops(session_id));
        assert!(fx.hub.time_sync().is_tracking(session_id));

        let bob_messages = bob.drain();
        assert!(bob_messages.iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { is_spectator: false, side: Some(Side::White), .. }
        )));
        let alice_messages = alice.drain();
        assert!(alice_messages
            .iter()
            .any(|m| matches!(m, OutboundMessage::StateUpdated { .. })));
        // Players do not see their own game among the watchable ones.
        assert!(last_lobby(&alice_messages).unwrap().watchable.is_empty());

        let ops = fx.persisted();
        assert!(matches!(
            ops.last(),
            Some(PersistOp::Update { patch, .. }) if patch.status == Some(SessionStatus::Active)
        ));
    }

    #[test]
    fn rejoining_a_held_seat_restores_it() {
        let mut fx = Fixture::new();
        let (_alice, mut bob, session_id) = fx.playing("5+0");
        fx.join(&bob, session_id);

        assert!(bob.drain().iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { is_spectator: false, side: Some(Side::White), .. }
        )));
        assert!(fx.hub.session(session_id).unwrap().spectators.is_empty());
    }

    #[test]
    fn clocks_stay_idle_until_the_first_reply() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");

        fx.play(&bob, session_id, "e2e4");
        assert_eq!(fx.hub.clocks().running_count(), 0);
        assert_eq!(fx.hub.timers().clock_count(), 0);
        assert!(!fx.hub.session(session_id).unwrap().is_started());

        fx.play(&alice, session_id, "e7e5");
        assert!(fx.hub.session(session_id).unwrap().is_started());
        assert!(fx.hub.clocks().is_running(&ClockKey::new(session_id, "bob")));
        assert!(!fx.hub.clocks().is_running(&ClockKey::new(session_id, "alice")));
        assert_eq!(fx.hub.timers().clock_count(), 1);
        assert_eq!(fx.remaining(session_id, "alice"), Some(300));
    }

    #[test]
    fn clock_expires_one_tick_after_reaching_zero() {
        let mut fx = Fixture::new();
        let (mut alice, mut bob, session_id) = fx.playing("1+0");
        fx.play(&bob, session_id, "e2e4");
        fx.play(&alice, session_id, "e7e5");

        for _ in 0..60 {
            fx.tick(session_id, "bob");
        }
        assert_eq!(fx.remaining(session_id, "bob"), Some(0));
        assert!(!fx.hub.session(session_id).unwrap().is_finished());

        let key = ClockKey::new(session_id, "bob");
        let generation = fx.hub.timers().clock_generation(&key).unwrap();
        fx.hub.tick_clock(&key, generation);

        let session = fx.hub.session(session_id).unwrap();
        let result = session.result.as_ref().unwrap();
        assert_eq!(result.kind, ResultKind::Ontime);
        assert_eq!(result.winner.as_deref(), Some("alice"));
        assert_eq!(fx.hub.timers().clock_count(), 0);
        assert!(!fx.hub.timers().has_session_loops(session_id));
        assert!(!fx.hub.time_sync().is_tracking(session_id));

        // A tick already in flight lands after finalize and changes nothing.
        fx.hub.tick_clock(&key, generation);
        assert_eq!(terminations(&alice.drain()), 1);
        assert_eq!(terminations(&bob.drain()), 1);
    }

    #[test]
    fn increment_is_credited_once_the_game_started() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("1+2");
        fx.play(&bob, session_id, "e2e4");
        fx.play(&alice, session_id, "e7e5");
        assert_eq!(fx.remaining(session_id, "alice"), Some(60));

        fx.tick(session_id, "bob");
        assert_eq!(fx.remaining(session_id, "bob"), Some(59));
        fx.play(&bob, session_id, "g1f3");
        assert_eq!(fx.remaining(session_id, "bob"), Some(61));
        assert!(fx.hub.clocks().is_running(&ClockKey::new(session_id, "alice")));
        assert!(!fx.hub.clocks().is_running(&ClockKey::new(session_id, "bob")));
    }

    #[test]
    fn ticks_from_a_replaced_loop_are_ignored() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        let bob_key = ClockKey::new(session_id, "bob");
        fx.play(&bob, session_id, "e2e4");
        fx.play(&alice, session_id, "e7e5");
        let first = fx.hub.timers().clock_generation(&bob_key).unwrap();

        fx.play(&bob, session_id, "g1f3");
        fx.play(&alice, session_id, "b8c6");
        let second = fx.hub.timers().clock_generation(&bob_key).unwrap();
        assert_ne!(first, second);
        assert_eq!(fx.hub.clocks().running_count(), 1);

        fx.hub.tick_clock(&bob_key, first);
        assert_eq!(fx.remaining(session_id, "bob"), Some(300));
        fx.hub.tick_clock(&bob_key, second);
        assert_eq!(fx.remaining(session_id, "bob"), Some(299));
    }

    #[test]
    fn invalid_moves_are_rejected_without_side_effects() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        let carol = fx.client("carol");
        fx.join(&carol, session_id);

        assert!(matches!(
            fx.hub.apply_move(alice.connection, session_id, "e7e5"),
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            fx.hub.apply_move(bob.connection, session_id, "e2e5"),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.hub.apply_move(carol.connection, session_id, "e2e4"),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.hub.apply_move(bob.connection, Uuid::new_v4(), "e2e4"),
            Err(ServiceError::NotFound(_))
        ));
        assert!(fx.hub.session(session_id).unwrap().history.is_empty());
    }

    #[test]
    fn host_cannot_move_before_an_opponent_joins() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        let session_id = fx.create(&alice, "5+0", Side::White);
        assert!(matches!(
            fx.hub.apply_move(alice.connection, session_id, "e2e4"),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn checkmate_finalizes_for_the_mating_side() {
        let mut fx = Fixture::new();
        let (mut alice, bob, session_id) = fx.playing("5+0");
        fx.play(&bob, session_id, "f2f3");
        fx.play(&alice, session_id, "e7e5");
        fx.play(&bob, session_id, "g2g4");
        fx.play(&alice, session_id, "d8h4");

        let session = fx.hub.session(session_id).unwrap();
        let result = session.result.as_ref().unwrap();
        assert_eq!(result.kind, ResultKind::Checkmate);
        assert_eq!(result.winner.as_deref(), Some("alice"));
        assert!(!fx.hub.lobby().is_watchable(session_id));
        assert_eq!(fx.hub.clocks().running_count(), 0);

        let messages = alice.drain();
        let broadcast = messages
            .iter()
            .position(|m| matches!(m, OutboundMessage::MoveBroadcast(summary) if summary.mv == "d8h4"))
            .unwrap();
        let termination = messages
            .iter()
            .position(|m| matches!(m, OutboundMessage::Termination { .. }))
            .unwrap();
        assert!(broadcast < termination);

        assert!(matches!(
            fx.hub.apply_move(bob.connection, session_id, "a2a3"),
            Err(ServiceError::InvalidState(_))
        ));
        assert_eq!(fx.hub.session(session_id).unwrap().history.len(), 4);
    }

    #[test]
    fn resignation_awards_the_opponent() {
        let mut fx = Fixture::new();
        let (mut alice, mut bob, session_id) = fx.playing("5+0");
        fx.persisted();
        fx.hub
            .handle(bob.connection, InboundMessage::Resign { session_id }, fx.t0)
            .unwrap();

        let result = fx.hub.session(session_id).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Resignation);
        assert_eq!(result.winner.as_deref(), Some("alice"));

        for messages in [alice.drain(), bob.drain()] {
            assert_eq!(terminations(&messages), 1);
            assert!(matches!(messages.last(), Some(OutboundMessage::LobbyListing(_))));
            assert_eq!(
                count(&messages, |m| matches!(m, OutboundMessage::ClockSync { .. })),
                1
            );
        }

        let ops = fx.persisted();
        assert!(matches!(
            ops.as_slice(),
            [PersistOp::Update { patch, .. }]
                if patch.finished == Some(true)
                    && patch.result.as_ref().map(|r| r.kind) == Some(ResultKind::Resignation)
        ));

        assert!(matches!(
            fx.hub.resign(alice.connection, session_id),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn spectators_cannot_resign() {
        let mut fx = Fixture::new();
        let (_alice, _bob, session_id) = fx.playing("5+0");
        let mut carol = fx.client("carol");
        fx.join(&carol, session_id);

        assert!(carol.drain().iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { is_spectator: true, side: None, .. }
        )));
        assert!(matches!(
            fx.hub.resign(carol.connection, session_id),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(!fx.hub.session(session_id).unwrap().is_finished());
    }

    #[test]
    fn host_can_withdraw_an_open_session() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        let session_id = fx.create(&alice, "5+0", Side::White);
        fx.hub.resign(alice.connection, session_id).unwrap();

        let result = fx.hub.session(session_id).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Resignation);
        assert_eq!(result.winner, None);
        assert!(!fx.hub.lobby().is_joinable(session_id));
    }

    #[test]
    fn finalize_runs_once() {
        let mut fx = Fixture::new();
        let (mut alice, _bob, session_id) = fx.playing("5+0");
        assert!(fx.hub.finalize(session_id, ResultKind::Abandonment, Some("alice".into())));
        assert!(!fx.hub.finalize(session_id, ResultKind::Ontime, Some("bob".into())));
        assert!(!fx.hub.finalize(Uuid::new_v4(), ResultKind::Ontime, None));

        let result = fx.hub.session(session_id).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Abandonment);
        assert_eq!(terminations(&alice.drain()), 1);
    }

    #[test]
    fn reconnect_without_missed_move_does_not_replay() {
        let mut fx = Fixture::new();
        let (_alice, bob, session_id) = fx.playing("5+0");
        fx.play(&bob, session_id, "e2e4");

        let mut bob = fx.reconnect(bob, "bob");
        let messages = bob.drain();
        assert!(matches!(
            messages.first(),
            Some(OutboundMessage::IdentityConfirmed { returning: true, .. })
        ));
        assert!(matches!(messages.get(1), Some(OutboundMessage::LobbyListing(_))));
        assert!(messages.iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { is_spectator: false, side: Some(Side::White), session }
                if session.id == session_id
        )));
        assert_eq!(count(&messages, |m| matches!(m, OutboundMessage::MoveBroadcast(_))), 0);
        assert_eq!(terminations(&messages), 0);
    }

    #[test]
    fn missed_move_is_replayed_exactly_once() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        fx.play(&bob, session_id, "e2e4");
        fx.hub.disconnect(bob.connection);
        fx.play(&alice, session_id, "e7e5");
        assert_eq!(fx.hub.has_acknowledged("bob", session_id), Some(false));

        let mut bob = fx.connect_as("bob");
        let messages = bob.drain();
        let replayed: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::MoveBroadcast(summary) => Some(summary.mv.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(replayed, ["e7e5"]);
        assert!(matches!(messages.last(), Some(OutboundMessage::StateUpdated { .. })));
        assert_eq!(fx.hub.has_acknowledged("bob", session_id), Some(true));

        let mut bob = fx.reconnect(bob, "bob");
        assert_eq!(
            count(&bob.drain(), |m| matches!(m, OutboundMessage::MoveBroadcast(_))),
            0
        );
    }

    #[test]
    fn acknowledged_move_is_not_replayed() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        fx.play(&bob, session_id, "e2e4");
        fx.play(&alice, session_id, "e7e5");
        assert_eq!(fx.hub.has_acknowledged("bob", session_id), Some(false));
        assert_eq!(fx.hub.has_acknowledged("alice", session_id), Some(true));

        fx.hub
            .handle(bob.connection, InboundMessage::AckMove { session_id }, fx.t0)
            .unwrap();
        let mut bob = fx.reconnect(bob, "bob");
        assert_eq!(
            count(&bob.drain(), |m| matches!(m, OutboundMessage::MoveBroadcast(_))),
            0
        );
    }

    #[test]
    fn reconnect_to_a_finished_session_reports_the_result() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        fx.hub.disconnect(bob.connection);
        fx.hub.resign(alice.connection, session_id).unwrap();

        let mut bob = fx.connect_as("bob");
        let messages = bob.drain();
        assert!(messages.iter().any(|m| matches!(
            m,
            OutboundMessage::Termination { result: ResultKind::Resignation, winner: Some(w), .. }
                if w == "bob"
        )));
        assert!(matches!(messages.last(), Some(OutboundMessage::ClockSync { .. })));
    }

    #[test]
    fn newest_connection_owns_the_identity() {
        let mut fx = Fixture::new();
        let (mut alice, bob, session_id) = fx.playing("5+0");
        let mut alice_again = fx.connect_as("alice");
        alice_again.drain();
        alice.drain();

        fx.play(&bob, session_id, "e2e4");
        assert!(alice.drain().is_empty());
        assert_eq!(
            count(&alice_again.drain(), |m| matches!(m, OutboundMessage::MoveBroadcast(_))),
            1
        );
        assert!(matches!(
            fx.hub.handle(alice.connection, InboundMessage::RequestLobby, fx.t0),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn silent_participant_loses_by_abandonment() {
        let mut fx = Fixture::new();
        let (alice, _bob, session_id) = fx.playing("5+0");
        let window = AppConfig::default().liveness_window;

        fx.hub
            .handle(alice.connection, InboundMessage::AckLiveness, fx.t0 + window / 2)
            .unwrap();
        fx.hub.liveness_check(session_id, fx.t0 + Duration::from_secs(10));
        assert!(!fx.hub.session(session_id).unwrap().is_finished());

        fx.hub
            .liveness_check(session_id, fx.t0 + window + Duration::from_secs(1));
        let result = fx.hub.session(session_id).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Abandonment);
        assert_eq!(result.winner.as_deref(), Some("alice"));
        assert!(!fx.hub.timers().has_session_loops(session_id));
    }

    #[test]
    fn both_silent_ends_without_winner() {
        let mut fx = Fixture::new();
        let (_alice, _bob, session_id) = fx.playing("5+0");
        let window = AppConfig::default().liveness_window;
        fx.hub
            .liveness_check(session_id, fx.t0 + window + Duration::from_secs(1));

        let result = fx.hub.session(session_id).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Abandonment);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn sync_tick_broadcasts_until_the_session_ends() {
        let mut fx = Fixture::new();
        let (mut alice, bob, session_id) = fx.playing("5+0");
        fx.hub.sync_tick(session_id);
        assert!(alice.drain().iter().any(|m| matches!(
            m,
            OutboundMessage::ClockSync { clocks, .. } if clocks.white == 300 && clocks.black == 300
        )));

        fx.hub.resign(bob.connection, session_id).unwrap();
        alice.drain();
        fx.hub.sync_tick(session_id);
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn annotations_reach_the_room() {
        let mut fx = Fixture::new();
        let (mut alice, mut bob, session_id) = fx.playing("5+0");
        let carol = fx.client("carol");
        fx.join(&carol, session_id);
        let dave = fx.client("dave");

        let payload = serde_json::json!({ "arrow": "e2e4" });
        fx.hub
            .handle(
                carol.connection,
                InboundMessage::Annotate {
                    session_id,
                    payload: payload.clone(),
                },
                fx.t0,
            )
            .unwrap();
        for messages in [alice.drain(), bob.drain()] {
            assert!(messages.iter().any(|m| matches!(
                m,
                OutboundMessage::Annotation { from, payload: p, .. } if from == "carol" && *p == payload
            )));
        }

        assert!(matches!(
            fx.hub.handle(
                dave.connection,
                InboundMessage::Annotate {
                    session_id,
                    payload
                },
                fx.t0
            ),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn spectating_keeps_the_played_session_current() {
        let mut fx = Fixture::new();
        let (alice, _bob, first) = fx.playing("5+0");
        let carol = fx.client("carol");
        let dave = fx.client("dave");
        let second = fx.create(&carol, "3+0", Side::White);
        fx.join(&dave, second);

        fx.join(&alice, second);
        assert!(fx.hub.session(second).unwrap().spectators.contains("alice"));
        assert_eq!(
            fx.hub.registry().participant("alice").unwrap().current_session,
            Some(first)
        );
    }

    #[test]
    fn request_state_and_logout() {
        let mut fx = Fixture::new();
        let (mut alice, _bob, session_id) = fx.playing("5+0");
        fx.hub
            .handle(alice.connection, InboundMessage::RequestState { session_id }, fx.t0)
            .unwrap();
        assert!(matches!(
            alice.drain().as_slice(),
            [OutboundMessage::StateUpdated { session }] if session.id == session_id
        ));
        assert!(matches!(
            fx.hub.handle(
                alice.connection,
                InboundMessage::RequestState {
                    session_id: Uuid::new_v4()
                },
                fx.t0
            ),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            fx.hub.handle(alice.connection, InboundMessage::Unknown, fx.t0),
            Err(ServiceError::InvalidInput(_))
        ));

        fx.hub
            .handle(alice.connection, InboundMessage::Logout, fx.t0)
            .unwrap();
        assert!(fx.hub.registry().participant("alice").is_none());
        assert_eq!(fx.hub.has_acknowledged("alice", session_id), None);
        assert!(matches!(
            fx.hub.handle(alice.connection, InboundMessage::RequestLobby, fx.t0),
            Err(ServiceError::Unauthorized(_))
        ));

        fx.hub
            .identify(alice.connection, "alice".into(), fx.t0)
            .unwrap();
        assert!(matches!(
            alice.drain().first(),
            Some(OutboundMessage::IdentityConfirmed { returning: false, .. })
        ));
    }

    #[test]
    fn oversized_time_control_is_rejected() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        for time_control in ["71582789+0", "4294967295+0", "181+0"] {
            assert!(matches!(
                fx.hub.create(alice.connection, time_control, None),
                Err(ServiceError::InvalidInput(_))
            ));
        }
        assert_eq!(fx.hub.lobby_overview().joinable.len(), 0);
        assert!(fx.hub.create(alice.connection, "180+180", None).is_ok());
    }

    #[test]
    fn joining_an_unknown_session_is_not_found() {
        let mut fx = Fixture::new();
        let bob = fx.client("bob");
        assert!(matches!(
            fx.hub.join(bob.connection, Uuid::new_v4(), fx.t0),
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(
            fx.hub.registry().participant("bob").unwrap().current_session,
            None
        );
    }

    #[test]
    fn seated_participant_only_watches_another_game() {
        let mut fx = Fixture::new();
        let (alice, _bob, first) = fx.playing("5+0");
        let carol = fx.client("carol");
        let second = fx.create(&carol, "3+0", Side::White);

        fx.join(&alice, second);
        let session = fx.hub.session(second).unwrap();
        assert_eq!(session.phase(), SessionPhase::Open);
        assert_eq!(session.seat_of("alice"), None);
        assert!(session.spectators.contains("alice"));
        assert!(fx.hub.lobby().is_joinable(second));
        assert_eq!(
            fx.hub.registry().participant("alice").unwrap().current_session,
            Some(first)
        );

        // Acknowledgements keep refreshing the game alice is seated in.
        let window = AppConfig::default().liveness_window;
        fx.hub
            .handle(alice.connection, InboundMessage::AckLiveness, fx.t0 + window)
            .unwrap();
        fx.hub
            .liveness_check(first, fx.t0 + window + Duration::from_secs(1));
        let result = fx.hub.session(first).unwrap().result.clone().unwrap();
        assert_eq!(result.kind, ResultKind::Abandonment);
        assert_eq!(result.winner.as_deref(), Some("alice"));
    }

    #[test]
    fn unlisted_session_cannot_be_joined_by_id() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        let bob = fx.client("bob");
        let first = fx.create(&alice, "5+0", Side::White);
        let second = fx.create(&alice, "3+2", Side::Black);

        fx.join(&bob, first);
        let session = fx.hub.session(first).unwrap();
        assert_eq!(session.phase(), SessionPhase::Open);
        assert_eq!(session.seat_of("bob"), None);
        assert!(session.spectators.contains("bob"));

        let mut alice = fx.reconnect(alice, "alice");
        assert!(alice.drain().iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { session, is_spectator: false, .. } if session.id == second
        )));
    }

    #[test]
    fn host_taking_a_seat_elsewhere_unlists_its_open_session() {
        let mut fx = Fixture::new();
        let alice = fx.client("alice");
        let bob = fx.client("bob");
        let own = fx.create(&alice, "5+0", Side::White);
        let other = fx.create(&bob, "5+0", Side::White);

        fx.join(&alice, other);
        assert_eq!(fx.hub.session(other).unwrap().seat_of("alice"), Some(Side::Black));
        assert!(!fx.hub.lobby().is_joinable(own));
        assert_eq!(
            fx.hub.registry().participant("alice").unwrap().current_session,
            Some(other)
        );
    }

    #[test]
    fn result_is_replayed_only_to_participants_who_missed_it() {
        let mut fx = Fixture::new();
        let (alice, bob, session_id) = fx.playing("5+0");
        fx.hub.disconnect(bob.connection);
        fx.hub.resign(alice.connection, session_id).unwrap();

        let mut bob = fx.connect_as("bob");
        assert_eq!(terminations(&bob.drain()), 1);
        let mut bob = fx.reconnect(bob, "bob");
        let messages = bob.drain();
        assert_eq!(terminations(&messages), 0);
        assert!(messages.iter().any(|m| matches!(
            m,
            OutboundMessage::SessionJoined { session, .. } if session.id == session_id
        )));

        let mut alice = fx.reconnect(alice, "alice");
        assert_eq!(terminations(&alice.drain()), 0);
    }

    #[test]
    fn late_spectator_receives_the_latest_move_on_reconnection() {
        let mut fx = Fixture::new();
        let (_alice, bob, session_id) = fx.playing("5+0");
        fx.play(&bob, session_id, "e2e4");
        let carol = fx.client("carol");
        fx.join(&carol, session_id);
        assert_eq!(fx.hub.has_acknowledged("carol", session_id), Some(false));

        let mut carol = fx.reconnect(carol, "carol");
        let replayed: Vec<_> = carol
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::MoveBroadcast(summary) => Some(summary.mv),
                _ => None,
            })
            .collect();
        assert_eq!(replayed, ["e2e4"]);
        assert_eq!(fx.hub.has_acknowledged("carol", session_id), Some(true));
    }
}
