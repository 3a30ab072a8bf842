//! Records produced by the session controller.
//!
//! A [`GameSession`] is built move by move by the session controller only, and is immutable
//! once handed over.

use std::{
    fmt::Display,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::schedule::Pairing;

/// Board snapshot as reported by the game server. Cell encoding belongs to the game server.
pub type Board = Vec<Vec<i32>>;

/// Side of a two-player board game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Moves first.
    Black,
    /// Moves second.
    White,
}

impl Color {
    /// The other side.
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// Status reported when this side wins.
    pub fn win_status(self) -> GameStatus {
        match self {
            Color::Black => GameStatus::BlackWin,
            Color::White => GameStatus::WhiteWin,
        }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

/// Board coordinate, `[x, y]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position(pub u32, pub u32);

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.0, self.1)
    }
}

/// One accepted move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Move {
    /// Who played it.
    pub color: Color,
    /// Where.
    pub position: Position,
    /// Offset from the start of the session.
    pub at: Duration,
}

/// Final status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Black won.
    BlackWin,
    /// White won.
    WhiteWin,
    /// Nobody won.
    Draw,
    /// The session could not be brought to a result.
    Error,
}

impl GameStatus {
    /// Winning side, if the session is decisive.
    pub fn winner(self) -> Option<Color> {
        match self {
            GameStatus::BlackWin => Some(Color::Black),
            GameStatus::WhiteWin => Some(Color::White),
            GameStatus::Draw | GameStatus::Error => None,
        }
    }
}

/// Why a session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The game server declared a winner.
    Win,
    /// The game server declared a draw.
    Draw,
    /// The mover did not answer before the deadline.
    Timeout,
    /// The move request failed or returned garbage.
    TransportError,
    /// The game server rejected the mover's coordinate.
    IllegalMove,
    /// The game server itself failed mid-session.
    ServerError,
}

impl Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::Win => "win",
            EndReason::Draw => "draw",
            EndReason::Timeout => "timeout",
            EndReason::TransportError => "transport_error",
            EndReason::IllegalMove => "illegal_move",
            EndReason::ServerError => "server_error",
        };
        write!(f, "{s}")
    }
}

/// Thinking time statistics of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThinkingTime {
    /// Number of answered move requests.
    pub moves: u32,
    /// Mean wall-clock time between dispatching a request and receiving its answer.
    pub average: Duration,
}

/// A complete game between two agents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSession {
    /// Game id assigned by the game server.
    pub id: String,
    /// What was scheduled.
    pub pairing: Pairing,
    /// Accepted moves, in order.
    pub moves: Vec<Move>,
    /// Last board reported by the game server.
    pub final_board: Board,
    /// Side that was to move when the session ended.
    pub final_mover: Option<Color>,
    /// Last accepted move.
    pub last_move: Option<Position>,
    /// Outcome.
    pub game_status: GameStatus,
    /// Why it ended.
    pub end_reason: EndReason,
    /// Wall-clock duration from game creation to termination.
    pub duration: Duration,
    /// Black's thinking time.
    pub black_thinking: ThinkingTime,
    /// White's thinking time.
    pub white_thinking: ThinkingTime,
    /// Raw move history of the game server, when it could be fetched.
    pub server_history: Option<serde_json::Value>,
}

impl GameSession {
    /// Id of the winning agent.
    pub fn winner_id(&self) -> Option<&str> {
        self.game_status
            .winner()
            .map(|color| self.pairing.agent_for(color))
    }

    /// Id of the losing agent.
    pub fn loser_id(&self) -> Option<&str> {
        self.game_status
            .winner()
            .map(|color| self.pairing.agent_for(color.opponent()))
    }

    /// Thinking time of `color`.
    pub fn thinking(&self, color: Color) -> ThinkingTime {
        match color {
            Color::Black => self.black_thinking,
            Color::White => self.white_thinking,
        }
    }

    /// True unless the game server failed mid-session.
    pub fn is_completed(&self) -> bool {
        self.game_status != GameStatus::Error
    }
}

#[derive(Debug, Default)]
struct ThinkingClock {
    moves: u32,
    total: Duration,
}

impl ThinkingClock {
    fn summary(&self) -> ThinkingTime {
        let average = if self.moves == 0 {
            Duration::ZERO
        } else {
            self.total / self.moves
        };
        ThinkingTime {
            moves: self.moves,
            average,
        }
    }
}

/// Mutable builder of a [`GameSession`], owned by the session controller.
#[derive(Debug)]
pub(crate) struct SessionRecorder {
    id: String,
    pairing: Pairing,
    started: Instant,
    ended: Option<Instant>,
    moves: Vec<Move>,
    board: Board,
    final_mover: Option<Color>,
    black: ThinkingClock,
    white: ThinkingClock,
}

impl SessionRecorder {
    pub(crate) fn new(id: String, pairing: Pairing, started: Instant) -> Self {
        Self {
            id,
            pairing,
            started,
            ended: None,
            moves: vec![],
            board: vec![],
            final_mover: None,
            black: ThinkingClock::default(),
            white: ThinkingClock::default(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn move_count(&self) -> usize {
        self.moves.len()
    }

    pub(crate) fn set_board(&mut self, board: Board) {
        self.board = board;
    }

    pub(crate) fn set_mover(&mut self, color: Color) {
        self.final_mover = Some(color);
    }

    pub(crate) fn record_thinking(&mut self, color: Color, elapsed: Duration) {
        let clock = match color {
            Color::Black => &mut self.black,
            Color::White => &mut self.white,
        };
        clock.moves += 1;
        clock.total += elapsed;
    }

    /// Freezes the session duration; later bookkeeping (cleanup, history fetch) is not counted.
    pub(crate) fn stop(&mut self) {
        self.ended.get_or_insert_with(Instant::now);
    }

    pub(crate) fn push_move(&mut self, color: Color, position: Position) {
        let mut at = self.started.elapsed();
        // timestamps must be strictly increasing even on a coarse clock
        if let Some(prev) = self.moves.last() {
            if at <= prev.at {
                at = prev.at + Duration::from_nanos(1);
            }
        }
        self.moves.push(Move {
            color,
            position,
            at,
        });
    }

    pub(crate) fn finish(
        self,
        game_status: GameStatus,
        end_reason: EndReason,
        server_history: Option<serde_json::Value>,
    ) -> GameSession {
        let last_move = self.moves.last().map(|m| m.position);
        let ended = self.ended.unwrap_or_else(Instant::now);
        GameSession {
            id: self.id,
            pairing: self.pairing,
            moves: self.moves,
            final_board: self.board,
            final_mover: self.final_mover,
            last_move,
            game_status,
            end_reason,
            duration: ended.duration_since(self.started),
            black_thinking: self.black.summary(),
            white_thinking: self.white.summary(),
            server_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairing() -> Pairing {
        Pairing::new("a", "b", 1)
    }

    #[test]
    fn move_timestamps_strictly_increase() {
        let mut rec = SessionRecorder::new("g1".into(), pairing(), Instant::now());
        for i in 0..50 {
            rec.push_move(Color::Black, Position(i, i));
        }
        let session = rec.finish(GameStatus::Draw, EndReason::Draw, None);
        assert!(session.moves.windows(2).all(|w| w[0].at < w[1].at));
        assert_eq!(session.last_move, Some(Position(49, 49)));
    }

    #[test]
    fn thinking_time_is_averaged_per_color() {
        let mut rec = SessionRecorder::new("g1".into(), pairing(), Instant::now());
        rec.record_thinking(Color::Black, Duration::from_millis(100));
        rec.record_thinking(Color::Black, Duration::from_millis(300));
        rec.record_thinking(Color::White, Duration::from_millis(50));
        let session = rec.finish(GameStatus::BlackWin, EndReason::Win, None);
        assert_eq!(session.black_thinking.moves, 2);
        assert_eq!(session.black_thinking.average, Duration::from_millis(200));
        assert_eq!(session.white_thinking.average, Duration::from_millis(50));
    }

    #[test]
    fn winner_follows_the_color_assignment() {
        // repeat 1 swaps colors: "b" is black
        let rec = SessionRecorder::new("g1".into(), pairing(), Instant::now());
        let session = rec.finish(GameStatus::WhiteWin, EndReason::Timeout, None);
        assert_eq!(session.winner_id(), Some("a"));
        assert_eq!(session.loser_id(), Some("b"));
        assert!(session.is_completed());
    }

    #[test]
    fn position_uses_the_array_wire_shape() {
        let pos: Position = serde_json::from_str("[7, 3]").unwrap();
        assert_eq!(pos, Position(7, 3));
        assert!(serde_json::from_str::<Position>("[-1, 3]").is_err());
        assert_eq!(Color::White.to_string(), "white");
    }
}
