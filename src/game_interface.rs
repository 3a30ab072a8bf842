//! The two remote parties of a tournament, and what travels between them.
//!
//! The arena never talks HTTP directly: it goes through [`GameServer`] and [`AgentEndpoint`].
//! [`crate::http`] provides the network implementations; tests plug in-process fakes.
//!
//! Every answer of an agent is checked against a strict shape before it reaches session state
//! (see [`MoveReply::from_value`]).

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Board, Color, GameStatus, Position};

/// Failure of a game server call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The server understood the request and refused it (occupied cell, out of range, ...).
    #[error("rejected by game server: {0}")]
    Rejected(String),
    /// The server could not be reached or failed to answer properly.
    #[error("game server failure: {0}")]
    Unavailable(String),
}

/// The external game server, owner of the game rules.
pub trait GameServer: Send + Sync {
    /// Address handed to agents when they join a game.
    fn address(&self) -> &str;

    /// Liveness probe.
    fn health(&self, timeout: Duration) -> anyhow::Result<()>;

    /// Creates a new game for the two given agent ids.
    fn create_game(&self, black: &str, white: &str) -> Result<CreatedGame, ServerError>;

    /// Current state of a game.
    fn state(&self, game_id: &str) -> Result<GameState, ServerError>;

    /// Plays `position` for `color`, returning the updated state.
    ///
    /// # Error
    /// [`ServerError::Rejected`] when the move is not legal.
    fn submit_move(
        &self,
        game_id: &str,
        color: Color,
        position: Position,
    ) -> Result<GameState, ServerError>;

    /// Move history as recorded by the server. Opaque to the arena.
    fn history(&self, game_id: &str) -> Result<serde_json::Value, ServerError>;
}

/// A game-playing agent service.
///
/// The protocol assumes one game at a time per agent: `join` once, `request_move` for every
/// turn, `leave` once.
pub trait AgentEndpoint: Send + Sync {
    /// Liveness/readiness probe.
    fn health(&self, timeout: Duration) -> anyhow::Result<AgentHealth>;

    /// Capability description.
    fn info(&self, timeout: Duration) -> anyhow::Result<AgentInfo>;

    /// Tells the agent which color it plays in `request.game_id`.
    fn join(&self, request: &JoinRequest) -> anyhow::Result<()>;

    /// Asks for a move. `timeout` only bounds the transport; the move deadline is enforced by
    /// the caller.
    fn request_move(&self, request: &MoveRequest, timeout: Duration) -> anyhow::Result<MoveReply>;

    /// Tells the agent the game is over for it.
    fn leave(&self, game_id: &str) -> anyhow::Result<()>;
}

/// Answer to game creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedGame {
    /// Server-side game id.
    pub game_id: String,
    /// Side length of the board, when the server reports it.
    #[serde(default)]
    pub board_size: Option<usize>,
}

/// Status field of a game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Game still running.
    #[default]
    Ongoing,
    /// Black won.
    BlackWin,
    /// White won.
    WhiteWin,
    /// Draw.
    Draw,
}

impl ServerStatus {
    /// Final status, or `None` while the game is running.
    pub fn terminal(self) -> Option<GameStatus> {
        match self {
            ServerStatus::Ongoing => None,
            ServerStatus::BlackWin => Some(GameStatus::BlackWin),
            ServerStatus::WhiteWin => Some(GameStatus::WhiteWin),
            ServerStatus::Draw => Some(GameStatus::Draw),
        }
    }
}

/// Game state as reported by the game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Board snapshot.
    pub board: Board,
    /// Side to move.
    pub current_player: Color,
    /// Whether the game is over, and how.
    #[serde(default)]
    pub game_status: ServerStatus,
    /// Last move played, if the server reports it.
    #[serde(default)]
    pub last_move: Option<Position>,
}

impl GameState {
    /// True once the server declared a result.
    pub fn is_terminal(&self) -> bool {
        self.game_status.terminal().is_some()
    }
}

/// Body of the agent `join_game` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinRequest {
    /// Game to join.
    pub game_id: String,
    /// Assigned color.
    pub my_color: Color,
    /// Where the agent may look the game up.
    pub game_server_url: String,
}

/// Body of the agent `get_move` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRequest {
    /// Game being played.
    pub game_id: String,
    /// Current board.
    pub board: Board,
    /// Side to move (the agent's own color).
    pub current_player: Color,
}

/// Validated answer of an agent to a move request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveReply {
    /// Chosen coordinate.
    #[serde(rename = "move")]
    pub position: Position,
    /// Free-form explanation, if the agent sent one.
    pub reasoning: Option<String>,
}

impl MoveReply {
    /// Checks an arbitrary JSON answer against the expected `{"move": [x, y], "reasoning": ...}`
    /// shape.
    pub fn from_value(value: serde_json::Value) -> anyhow::Result<MoveReply> {
        let serde_json::Value::Object(mut map) = value else {
            bail!("move reply is not a JSON object");
        };
        if let Some(err) = map.get("error") {
            bail!("agent reported an error: {err}");
        }
        let raw = map.remove("move").context("move reply has no 'move' field")?;
        let position: Position = serde_json::from_value(raw.clone())
            .map_err(|_| anyhow!("'move' must be a pair of non-negative integers, got {raw}"))?;
        let reasoning = match map.remove("reasoning") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        Ok(MoveReply {
            position,
            reasoning,
        })
    }
}

/// Answer of an agent health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Reported status, e.g. `"healthy"`.
    pub status: String,
}

impl AgentHealth {
    /// True when the agent declares itself able to play.
    pub fn is_ready(&self) -> bool {
        ["healthy", "ok", "ready"]
            .iter()
            .any(|s| self.status.eq_ignore_ascii_case(s))
    }
}

/// Capability description of an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct AgentInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}
