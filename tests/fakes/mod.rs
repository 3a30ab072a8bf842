//! In-process game server and agents.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use agent_arena::agent::Agent;
use agent_arena::anyhow::{self, bail};
use agent_arena::game_interface::{
    AgentEndpoint, AgentHealth, AgentInfo, CreatedGame, GameServer, GameState, JoinRequest,
    MoveReply, MoveRequest, ServerError, ServerStatus,
};
use agent_arena::session::{Board, Color, Position};
use tracing::Level;

pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .without_time()
        .with_target(false)
        .try_init();
}

struct FakeGame {
    board: Board,
    current: Color,
    status: ServerStatus,
    last_move: Option<Position>,
    moves: usize,
}

impl FakeGame {
    fn state(&self) -> GameState {
        GameState {
            board: self.board.clone(),
            current_player: self.current,
            game_status: self.status,
            last_move: self.last_move,
        }
    }
}

/// Gomoku-shaped game server without real rules: the mover wins after `win_after` accepted
/// moves, the game is drawn when the board is full, occupied cells are rejected.
pub struct FakeGameServer {
    board_size: usize,
    win_after: Option<usize>,
    healthy: bool,
    failing_creates: AtomicUsize,
    never_ends: bool,
    next_id: AtomicUsize,
    games: Mutex<HashMap<String, FakeGame>>,
    pub creates: AtomicUsize,
}

impl FakeGameServer {
    pub fn new(board_size: usize, win_after: Option<usize>) -> Self {
        Self {
            board_size,
            win_after,
            healthy: true,
            failing_creates: AtomicUsize::new(0),
            never_ends: false,
            next_id: AtomicUsize::new(1),
            games: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// The next `count` game creations fail.
    pub fn failing_creates(self, count: usize) -> Self {
        self.failing_creates.store(count, Ordering::SeqCst);
        self
    }

    /// Accepted moves are forgotten and the game is never declared over.
    pub fn never_ending(mut self) -> Self {
        self.never_ends = true;
        self
    }

    pub fn games_created(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl GameServer for FakeGameServer {
    fn address(&self) -> &str {
        "http://fake-game-server"
    }

    fn health(&self, _timeout: Duration) -> anyhow::Result<()> {
        if self.healthy {
            Ok(())
        } else {
            bail!("connection refused")
        }
    }

    fn create_game(&self, _black: &str, _white: &str) -> Result<CreatedGame, ServerError> {
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ServerError::Unavailable("HTTP 503 Service Unavailable".into()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("game_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let game = FakeGame {
            board: vec![vec![0; self.board_size]; self.board_size],
            current: Color::Black,
            status: ServerStatus::Ongoing,
            last_move: None,
            moves: 0,
        };
        self.games.lock().unwrap().insert(id.clone(), game);
        Ok(CreatedGame {
            game_id: id,
            board_size: Some(self.board_size),
        })
    }

    fn state(&self, game_id: &str) -> Result<GameState, ServerError> {
        let games = self.games.lock().unwrap();
        let game = games
            .get(game_id)
            .ok_or_else(|| ServerError::Rejected(format!("unknown game {game_id}")))?;
        Ok(game.state())
    }

    fn submit_move(
        &self,
        game_id: &str,
        color: Color,
        position: Position,
    ) -> Result<GameState, ServerError> {
        let mut games = self.games.lock().unwrap();
        let game = games
            .get_mut(game_id)
            .ok_or_else(|| ServerError::Rejected(format!("unknown game {game_id}")))?;
        if game.status != ServerStatus::Ongoing {
            return Err(ServerError::Rejected("game is over".into()));
        }
        if color != game.current {
            return Err(ServerError::Rejected("not your turn".into()));
        }
        let Position(x, y) = position;
        let (x, y) = (x as usize, y as usize);
        if x >= self.board_size || y >= self.board_size {
            return Err(ServerError::Rejected("out of the board".into()));
        }
        if game.board[x][y] != 0 {
            return Err(ServerError::Rejected("position already occupied".into()));
        }

        game.moves += 1;
        game.last_move = Some(position);
        if !self.never_ends {
            game.board[x][y] = if color == Color::Black { 1 } else { 2 };
            if self.win_after == Some(game.moves) {
                game.status = match color {
                    Color::Black => ServerStatus::BlackWin,
                    Color::White => ServerStatus::WhiteWin,
                };
            } else if game.board.iter().flatten().all(|c| *c != 0) {
                game.status = ServerStatus::Draw;
            }
        }
        game.current = color.opponent();
        Ok(game.state())
    }

    fn history(&self, game_id: &str) -> Result<serde_json::Value, ServerError> {
        let games = self.games.lock().unwrap();
        let game = games
            .get(game_id)
            .ok_or_else(|| ServerError::Rejected(format!("unknown game {game_id}")))?;
        Ok(serde_json::json!({ "game_id": game_id, "moves": game.moves }))
    }
}

/// How a fake agent answers move requests.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// First empty cell, scanning rows.
    FirstFree,
    /// Always the same cell.
    Fixed(Position),
    /// Sleeps, then plays the first empty cell.
    Slow(Duration),
    /// Sleeps, then always plays the same cell.
    SlowFixed(Duration, Position),
    /// Transport failure.
    Broken,
    /// Panics while joining.
    PanicOnJoin,
    /// Join and leave requests fail; moves are answered like `FirstFree`.
    JoinLeaveRefused,
}

/// What a fake agent saw.
#[derive(Debug, Default)]
pub struct Calls {
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub moves: AtomicUsize,
    /// Games joined and not left yet.
    pub playing: AtomicUsize,
    /// Set if the agent was ever in two games at once.
    pub overlapped: AtomicBool,
    pub colors: Mutex<Vec<Color>>,
}

impl Calls {
    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }
    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
    pub fn moves(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }
}

pub struct FakeAgent {
    behavior: Behavior,
    healthy: bool,
    calls: Arc<Calls>,
}

fn first_free(board: &Board) -> Position {
    for (x, column) in board.iter().enumerate() {
        for (y, cell) in column.iter().enumerate() {
            if *cell == 0 {
                return Position(x as u32, y as u32);
            }
        }
    }
    Position(0, 0)
}

impl AgentEndpoint for FakeAgent {
    fn health(&self, _timeout: Duration) -> anyhow::Result<AgentHealth> {
        if !self.healthy {
            bail!("connection refused");
        }
        Ok(AgentHealth {
            status: "healthy".into(),
        })
    }

    fn info(&self, _timeout: Duration) -> anyhow::Result<AgentInfo> {
        Ok(AgentInfo {
            name: Some("fake".into()),
            version: Some("1.0".into()),
            ..Default::default()
        })
    }

    fn join(&self, request: &JoinRequest) -> anyhow::Result<()> {
        if let Behavior::PanicOnJoin = self.behavior {
            panic!("agent crashed on join");
        }
        self.calls.joins.fetch_add(1, Ordering::SeqCst);
        if let Behavior::JoinLeaveRefused = self.behavior {
            bail!("HTTP 500 Internal Server Error");
        }
        if self.calls.playing.fetch_add(1, Ordering::SeqCst) > 0 {
            self.calls.overlapped.store(true, Ordering::SeqCst);
        }
        self.calls.colors.lock().unwrap().push(request.my_color);
        Ok(())
    }

    fn request_move(
        &self,
        request: &MoveRequest,
        _timeout: Duration,
    ) -> anyhow::Result<MoveReply> {
        self.calls.moves.fetch_add(1, Ordering::SeqCst);
        let position = match self.behavior {
            Behavior::FirstFree | Behavior::PanicOnJoin | Behavior::JoinLeaveRefused => {
                first_free(&request.board)
            }
            Behavior::Fixed(position) => position,
            Behavior::Slow(delay) => {
                thread::sleep(delay);
                first_free(&request.board)
            }
            Behavior::SlowFixed(delay, position) => {
                thread::sleep(delay);
                position
            }
            Behavior::Broken => bail!("connection reset by peer"),
        };
        MoveReply::from_value(serde_json::json!({
            "move": [position.0, position.1],
            "reasoning": "fake",
        }))
    }

    fn leave(&self, _game_id: &str) -> anyhow::Result<()> {
        self.calls.leaves.fetch_add(1, Ordering::SeqCst);
        if let Behavior::JoinLeaveRefused = self.behavior {
            bail!("connection refused");
        }
        // a leave without a matching join (crashed join) must not underflow
        let _ = self
            .calls
            .playing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }
}

pub fn agent(id: &str, behavior: Behavior) -> (Agent, Arc<Calls>) {
    build(id, behavior, true)
}

pub fn unhealthy_agent(id: &str) -> (Agent, Arc<Calls>) {
    build(id, Behavior::FirstFree, false)
}

fn build(id: &str, behavior: Behavior, healthy: bool) -> (Agent, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let endpoint = FakeAgent {
        behavior,
        healthy,
        calls: calls.clone(),
    };
    let agent = Agent::new(
        id,
        format!("Agent {id}"),
        format!("http://{id}"),
        None,
        Arc::new(endpoint),
    );
    (agent, calls)
}
