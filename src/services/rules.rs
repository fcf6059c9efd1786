//! Move legality and terminal-position detection.
//!
//! The hub only sees [`RulesOracle`]; [`ChessOracle`] backs it with the `chess` crate and derives
//! every position from the accepted move history so repetition and the fifty-move counter stay
//! exact.

use std::{collections::HashMap, str::FromStr};

use chess::{Board, BoardStatus, ChessMove, Color, Piece};

use crate::{error::OracleError, state::session::{ResultKind, Side}};

/// Accepted move in normalized notation together with the resulting position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Legalized {
    /// Normalized (UCI) notation stored in the history.
    pub notation: String,
    /// Position after the move (FEN).
    pub position: String,
}

/// Terminal verdict for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `winner` delivered mate.
    Checkmate { winner: Side },
    /// Drawn, with one of the draw result kinds.
    Draw(ResultKind),
}

/// Trusted move-validation collaborator.
pub trait RulesOracle: Send + Sync {
    /// Position of a session without moves.
    fn initial_position(&self) -> String;

    /// Validate `candidate` against the position reached by `history`.
    fn legalize(&self, history: &[String], candidate: &str) -> Result<Legalized, OracleError>;

    /// Whether the position reached by `history` ends the game.
    fn outcome(&self, history: &[String]) -> Result<Option<Outcome>, OracleError>;
}

const FIFTY_MOVE_PLIES: u32 = 100;

/// Standard chess rules.
#[derive(Debug, Clone, Default)]
pub struct ChessOracle {
    start: Board,
}

/// Board reached by replaying a history, with what draw detection needs.
struct Replay {
    board: Board,
    halfmove_clock: u32,
    seen: HashMap<u64, u32>,
}

impl Replay {
    fn new(start: Board) -> Self {
        let mut seen = HashMap::new();
        seen.insert(start.get_hash(), 1);
        Self {
            board: start,
            halfmove_clock: 0,
            seen,
        }
    }

    fn push(&mut self, mv: ChessMove) {
        let resets = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || self.board.piece_on(mv.get_dest()).is_some();
        self.board = self.board.make_move_new(mv);
        self.halfmove_clock = if resets { 0 } else { self.halfmove_clock + 1 };
        *self.seen.entry(self.board.get_hash()).or_insert(0) += 1;
    }

    fn repetitions(&self) -> u32 {
        self.seen.get(&self.board.get_hash()).copied().unwrap_or(0)
    }
}

impl ChessOracle {
    /// Oracle starting from the standard initial position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Oracle starting from an arbitrary FEN position.
    pub fn from_fen(fen: &str) -> Result<Self, OracleError> {
        let start = Board::from_str(fen)
            .map_err(|err| OracleError::Fault(format!("invalid start position `{fen}`: {err}")))?;
        Ok(Self { start })
    }

    fn replay(&self, history: &[String]) -> Result<Replay, OracleError> {
        let mut replay = Replay::new(self.start);
        for (ply, notation) in history.iter().enumerate() {
            let mv = ChessMove::from_str(notation)
                .ok()
                .filter(|mv| replay.board.legal(*mv))
                .ok_or_else(|| {
                    OracleError::Fault(format!("stored move {notation} at ply {ply} is not legal"))
                })?;
            replay.push(mv);
        }
        Ok(replay)
    }

    /// Accept UCI (`e2e4`, `e7e8q`) first, then SAN (`e4`, `Nf3`, `exd8=Q+`).
    fn parse(board: &Board, candidate: &str) -> Result<ChessMove, OracleError> {
        let candidate = candidate.trim();
        if let Ok(mv) = ChessMove::from_str(candidate)
            && board.legal(mv)
        {
            return Ok(mv);
        }
        ChessMove::from_san(board, candidate)
            .ok()
            .filter(|mv| board.legal(*mv))
            .ok_or_else(|| OracleError::Rejected(candidate.to_string()))
    }
}

impl RulesOracle for ChessOracle {
    fn initial_position(&self) -> String {
        self.start.to_string()
    }

    fn legalize(&self, history: &[String], candidate: &str) -> Result<Legalized, OracleError> {
        let replay = self.replay(history)?;
        let mv = Self::parse(&replay.board, candidate)?;
        Ok(Legalized {
            notation: mv.to_string(),
            position: replay.board.make_move_new(mv).to_string(),
        })
    }

    fn outcome(&self, history: &[String]) -> Result<Option<Outcome>, OracleError> {
        let replay = self.replay(history)?;
        let outcome = match replay.board.status() {
            BoardStatus::Checkmate => Some(Outcome::Checkmate {
                winner: match replay.board.side_to_move() {
                    Color::White => Side::Black,
                    Color::Black => Side::White,
                },
            }),
            BoardStatus::Stalemate => Some(Outcome::Draw(ResultKind::DrawStalemate)),
            BoardStatus::Ongoing if insufficient_material(&replay.board) => {
                Some(Outcome::Draw(ResultKind::DrawInsufficientMaterial))
            }
            BoardStatus::Ongoing if replay.repetitions() >= 3 => {
                Some(Outcome::Draw(ResultKind::DrawThreefold))
            }
            BoardStatus::Ongoing if replay.halfmove_clock >= FIFTY_MOVE_PLIES => {
                Some(Outcome::Draw(ResultKind::DrawFiftyMove))
            }
            BoardStatus::Ongoing => None,
        };
        Ok(outcome)
    }
}

/// King against king, with at most one minor piece or bishops all on one square colour.
fn insufficient_material(board: &Board) -> bool {
    let heavy = board.pieces(Piece::Pawn).popcnt()
        + board.pieces(Piece::Rook).popcnt()
        + board.pieces(Piece::Queen).popcnt();
    if heavy > 0 {
        return false;
    }

    let knights = board.pieces(Piece::Knight).popcnt();
    let bishops = *board.pieces(Piece::Bishop);
    match (knights, bishops.popcnt()) {
        (0, 0) | (1, 0) | (0, 1) => true,
        (0, _) => {
            let mut shades = bishops
                .into_iter()
                .map(|square| (square.get_rank().to_index() + square.get_file().to_index()) % 2);
            let first = shades.next();
            shades.all(|shade| Some(shade) == first)
        }
        _ => false,
    }
}
