use std::{collections::BTreeSet, fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{ParticipantName, SessionId};

/// One of the two seats of a session. White is the first seat and moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// First seat.
    White,
    /// Second seat.
    Black,
}

impl Side {
    /// The other seat.
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Seat expected to play the move following `ply` half-moves.
    pub fn to_move_after(ply: usize) -> Side {
        if ply % 2 == 0 { Side::White } else { Side::Black }
    }

    /// Pick a seat uniformly at random.
    pub fn random() -> Side {
        if rand::random::<bool>() {
            Side::White
        } else {
            Side::Black
        }
    }
}

/// Base time plus per-move increment, written `minutes+seconds` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeControl {
    /// Starting clock of each side, in seconds.
    pub base_seconds: u32,
    /// Seconds credited to the mover after each move once the game is started.
    pub increment_seconds: u32,
}

impl TimeControl {
    /// Build a time control from minutes and increment seconds. The base saturates at `u32::MAX`.
    pub fn new(minutes: u32, increment_seconds: u32) -> Self {
        Self {
            base_seconds: minutes.saturating_mul(60),
            increment_seconds,
        }
    }

    /// Whole minutes of the base time.
    pub fn minutes(&self) -> u32 {
        self.base_seconds / 60
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.minutes(), self.increment_seconds)
    }
}

/// Failure to parse a `minutes+increment` time control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time control `{0}` (expected `minutes+increment`, e.g. `5+0`)")]
pub struct TimeControlParseError(pub String);

impl FromStr for TimeControl {
    type Err = TimeControlParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let err = || TimeControlParseError(value.to_string());
        let (minutes, increment) = value.trim().split_once('+').ok_or_else(err)?;
        let minutes = minutes.trim().parse::<u32>().map_err(|_| err())?;
        let increment = increment.trim().parse::<u32>().map_err(|_| err())?;
        if minutes == 0 && increment == 0 {
            return Err(err());
        }
        let base_seconds = minutes.checked_mul(60).ok_or_else(err)?;
        Ok(Self {
            base_seconds,
            increment_seconds: increment,
        })
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ResultKind {
    /// The side to move is mated.
    #[serde(rename = "checkmate")]
    Checkmate,
    /// A seated participant resigned.
    #[serde(rename = "resignation")]
    Resignation,
    /// A clock ran out.
    #[serde(rename = "ontime")]
    Ontime,
    /// A participant stopped acknowledging liveness.
    #[serde(rename = "abandonment")]
    Abandonment,
    /// The side to move has no legal move and is not in check.
    #[serde(rename = "draw.stalemate")]
    DrawStalemate,
    /// Same position reached three times.
    #[serde(rename = "draw.threefold")]
    DrawThreefold,
    /// Fifty moves without capture or pawn move.
    #[serde(rename = "draw.fifty_move")]
    DrawFiftyMove,
    /// Neither side can mate.
    #[serde(rename = "draw.insufficient_material")]
    DrawInsufficientMaterial,
}

impl ResultKind {
    /// Wire name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Checkmate => "checkmate",
            ResultKind::Resignation => "resignation",
            ResultKind::Ontime => "ontime",
            ResultKind::Abandonment => "abandonment",
            ResultKind::DrawStalemate => "draw.stalemate",
            ResultKind::DrawThreefold => "draw.threefold",
            ResultKind::DrawFiftyMove => "draw.fifty_move",
            ResultKind::DrawInsufficientMaterial => "draw.insufficient_material",
        }
    }

    /// Whether the outcome is one of the draw subkinds.
    pub fn is_draw(self) -> bool {
        matches!(
            self,
            ResultKind::DrawStalemate
                | ResultKind::DrawThreefold
                | ResultKind::DrawFiftyMove
                | ResultKind::DrawInsufficientMaterial
        )
    }
}

/// Recorded result of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    /// Kind of termination.
    pub kind: ResultKind,
    /// Winning participant, absent for draws and neutral terminations.
    pub winner: Option<ParticipantName>,
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, waiting for the second seat.
    Open,
    /// Both seats are filled.
    Active(PlayStatus),
    /// Terminal: position, history and result are frozen.
    Finished,
}

/// Sub-state of an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// The black seat has not replied to the first move yet; no clock runs.
    Grace,
    /// Clocks alternate with every move.
    Ongoing,
}

/// Lifecycle events applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The empty seat got a participant.
    SeatFilled,
    /// Black replied to the first move.
    FirstReply,
    /// The session reached a result.
    Finalize,
}

/// Error returned when a lifecycle event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the session was in.
    pub from: SessionPhase,
    /// Rejected event.
    pub event: SessionEvent,
}

/// Canonical in-memory state of a single game.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Participant that created the session.
    pub host: ParticipantName,
    /// Occupant of the white seat.
    pub white: Option<ParticipantName>,
    /// Occupant of the black seat.
    pub black: Option<ParticipantName>,
    /// Clock settings.
    pub time_control: TimeControl,
    /// Serialized board after the last accepted move.
    pub position: String,
    /// Accepted moves in order, normalized notation.
    pub history: Vec<String>,
    /// Participants attached without a seat.
    pub spectators: BTreeSet<ParticipantName>,
    /// Set once the session is finished.
    pub result: Option<SessionResult>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last mutation timestamp.
    pub updated_at: SystemTime,
    phase: SessionPhase,
}

impl Session {
    /// Open a new session with the host seated on `host_side`.
    pub fn open(
        host: ParticipantName,
        host_side: Side,
        time_control: TimeControl,
        initial_position: String,
    ) -> Self {
        let now = SystemTime::now();
        let (white, black) = match host_side {
            Side::White => (Some(host.clone()), None),
            Side::Black => (None, Some(host.clone())),
        };
        Self {
            id: Uuid::new_v4(),
            host,
            white,
            black,
            time_control,
            position: initial_position,
            history: Vec::new(),
            spectators: BTreeSet::new(),
            result: None,
            created_at: now,
            updated_at: now,
            phase: SessionPhase::Open,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True once the session has a result.
    pub fn is_finished(&self) -> bool {
        self.phase == SessionPhase::Finished
    }

    /// True once black has replied to the first move.
    pub fn is_started(&self) -> bool {
        matches!(self.phase, SessionPhase::Active(PlayStatus::Ongoing))
    }

    /// Occupant of `side`, if any.
    pub fn player(&self, side: Side) -> Option<&ParticipantName> {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    /// Seat held by `name`, if any.
    pub fn seat_of(&self, name: &str) -> Option<Side> {
        if self.white.as_deref() == Some(name) {
            Some(Side::White)
        } else if self.black.as_deref() == Some(name) {
            Some(Side::Black)
        } else {
            None
        }
    }

    /// Opponent of the seated participant `name`.
    pub fn opponent_of(&self, name: &str) -> Option<&ParticipantName> {
        self.seat_of(name)
            .and_then(|side| self.player(side.opponent()))
    }

    /// Seated participants in seat order.
    pub fn seated(&self) -> impl Iterator<Item = &ParticipantName> {
        self.white.iter().chain(self.black.iter())
    }

    /// Whether `name` may take the empty seat.
    pub fn is_joinable_by(&self, name: &str) -> bool {
        self.phase == SessionPhase::Open && self.host != name && self.empty_seat().is_some()
    }

    /// The seat still waiting for a participant.
    pub fn empty_seat(&self) -> Option<Side> {
        match (&self.white, &self.black) {
            (None, _) => Some(Side::White),
            (_, None) => Some(Side::Black),
            _ => None,
        }
    }

    /// Seat expected to play next.
    pub fn side_to_move(&self) -> Side {
        Side::to_move_after(self.history.len())
    }

    /// Label used by the watchable lobby list.
    pub fn label(&self) -> String {
        format!(
            "{} vs {}",
            self.white.as_deref().unwrap_or("?"),
            self.black.as_deref().unwrap_or("?")
        )
    }

    /// Place `name` on the empty seat and activate the session.
    pub fn fill_seat(&mut self, name: ParticipantName) -> Result<Side, InvalidTransition> {
        let side = self.empty_seat().ok_or(InvalidTransition {
            from: self.phase,
            event: SessionEvent::SeatFilled,
        })?;
        self.apply(SessionEvent::SeatFilled)?;
        match side {
            Side::White => self.white = Some(name),
            Side::Black => self.black = Some(name),
        }
        Ok(side)
    }

    /// Append an accepted move. Returns true when the move ended the grace period.
    pub fn record_move(
        &mut self,
        notation: String,
        position: String,
    ) -> Result<bool, InvalidTransition> {
        let ends_grace =
            self.phase == SessionPhase::Active(PlayStatus::Grace) && self.history.len() == 1;
        if ends_grace {
            self.apply(SessionEvent::FirstReply)?;
        }
        self.history.push(notation);
        self.position = position;
        self.updated_at = SystemTime::now();
        Ok(ends_grace)
    }

    /// Freeze the session with `result`.
    pub fn finish(&mut self, result: SessionResult) -> Result<(), InvalidTransition> {
        self.apply(SessionEvent::Finalize)?;
        self.result = Some(result);
        Ok(())
    }

    fn apply(&mut self, event: SessionEvent) -> Result<(), InvalidTransition> {
        self.phase = compute_transition(self.phase, event)?;
        self.updated_at = SystemTime::now();
        Ok(())
    }
}

/// Compute the phase reached by applying `event` from `from`.
pub fn compute_transition(
    from: SessionPhase,
    event: SessionEvent,
) -> Result<SessionPhase, InvalidTransition> {
    let next = match (from, event) {
        (SessionPhase::Open, SessionEvent::SeatFilled) => SessionPhase::Active(PlayStatus::Grace),
        (SessionPhase::Active(PlayStatus::Grace), SessionEvent::FirstReply) => {
            SessionPhase::Active(PlayStatus::Ongoing)
        }
        (SessionPhase::Open | SessionPhase::Active(_), SessionEvent::Finalize) => {
            SessionPhase::Finished
        }
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}
