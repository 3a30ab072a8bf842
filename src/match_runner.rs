//! Session controller: plays one scheduled game from creation to cleanup.
//!
//! Lifecycle of a session:
//! 1. create the game on the game server (bounded retries with exponential backoff),
//! 2. `join` each agent exactly once,
//! 3. until the game server reports a result: read the side to move from the server state,
//!    ask that agent for a move under the deadline, submit it,
//! 4. `leave` each agent exactly once, whatever happened in 3.
//!
//! Every failure of an agent or of the game server during 2–4 ends up as a terminal
//! [`GameSession`]; nothing is propagated to the caller. Only a game that could not even be
//! created is reported as [`SessionOutcome::Aborted`].

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::agent::Agent;
use crate::error::ArenaError;
use crate::game_interface::{
    CreatedGame, GameServer, JoinRequest, MoveReply, MoveRequest, ServerError,
};
use crate::schedule::Pairing;
use crate::session::{Color, EndReason, GameSession, GameStatus, SessionRecorder};

/// Extra time given to the transport of a move request past the deadline, so that abandoned
/// requests do not linger forever.
const TRANSPORT_SLACK: Duration = Duration::from_secs(5);

/// Timing and retry parameters of the session controller.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Deadline of a single move request.
    pub move_deadline: Duration,
    /// Board side used when the game server does not report one.
    pub board_size: usize,
    /// Attempts at creating a game.
    pub create_game_attempts: u32,
    /// Backoff after the first failed creation, doubled after each further failure.
    pub retry_backoff: Duration,
}

impl SessionSettings {
    /// Settings with the given move deadline and defaults for everything else.
    pub fn new(move_deadline: Duration) -> Self {
        Self {
            move_deadline,
            board_size: 15,
            create_game_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// What running a pairing produced.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The game was created; the session reached a terminal state.
    Finished(GameSession),
    /// The game could not be created at all.
    Aborted {
        /// What was scheduled.
        pairing: Pairing,
        /// Why it never started.
        error: ArenaError,
    },
}

impl SessionOutcome {
    /// The pairing this outcome belongs to.
    pub fn pairing(&self) -> &Pairing {
        match self {
            SessionOutcome::Finished(session) => &session.pairing,
            SessionOutcome::Aborted { pairing, .. } => pairing,
        }
    }
}

/// Runs sessions against one game server.
#[derive(Clone)]
pub struct SessionController {
    server: Arc<dyn GameServer>,
    settings: SessionSettings,
}

impl SessionController {
    /// Controller bound to `server`.
    pub fn new(server: Arc<dyn GameServer>, settings: SessionSettings) -> Self {
        Self { server, settings }
    }

    /// Plays `pairing` between `black` and `white` (which must match the pairing colors).
    #[instrument(skip_all, fields(pairing = %pairing))]
    pub fn run(&self, pairing: &Pairing, black: &Agent, white: &Agent) -> SessionOutcome {
        debug_assert_eq!(pairing.black, black.id);
        debug_assert_eq!(pairing.white, white.id);

        let started = Instant::now();
        let created = match self.create_game(pairing) {
            Ok(created) => created,
            Err(error) => {
                error!("{pairing} aborted: {error}");
                return SessionOutcome::Aborted {
                    pairing: pairing.clone(),
                    error,
                };
            }
        };
        let board_size = created.board_size.unwrap_or(self.settings.board_size);
        info!("game {} created for {pairing}", created.game_id);

        let game_id = created.game_id;
        let mut recorder = SessionRecorder::new(game_id.clone(), pairing.clone(), started);
        let (status, reason) = {
            let _seats = Seats::join(&game_id, [black, white], self.server.address());
            let termination = self.play(black, white, board_size, &mut recorder);
            recorder.stop();
            termination
            // seats are left here, on every path
        };

        if status != GameStatus::Error {
            match self.server.state(&game_id) {
                Ok(state) => recorder.set_board(state.board),
                Err(e) => debug!("could not read final state of {game_id}: {e}"),
            }
        }
        let history = match self.server.history(&game_id) {
            Ok(history) => Some(history),
            Err(e) => {
                debug!("could not read history of {game_id}: {e}");
                None
            }
        };

        let session = recorder.finish(status, reason, history);
        info!(
            "game {} over: {:?} ({}) after {} moves",
            session.id,
            session.game_status,
            session.end_reason,
            session.moves.len()
        );
        SessionOutcome::Finished(session)
    }

    fn create_game(&self, pairing: &Pairing) -> Result<CreatedGame, ArenaError> {
        let attempts = self.settings.create_game_attempts.max(1);
        let mut backoff = self.settings.retry_backoff;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.server.create_game(&pairing.black, &pairing.white) {
                Ok(created) => return Ok(created),
                Err(e) => {
                    warn!("attempt {attempt}/{attempts} at creating {pairing} failed: {e}");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
        }
        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(ArenaError::GameServerUnavailable(format!(
            "could not create a game after {attempts} attempts: {last_error}"
        )))
    }

    fn play(
        &self,
        black: &Agent,
        white: &Agent,
        board_size: usize,
        recorder: &mut SessionRecorder,
    ) -> (GameStatus, EndReason) {
        let game_id = recorder.id().to_owned();
        let max_moves = board_size.saturating_mul(board_size).max(1);

        let mut state = match self.server.state(&game_id) {
            Ok(state) => state,
            Err(e) => {
                error!("could not read state of {game_id}: {e}");
                return (GameStatus::Error, EndReason::ServerError);
            }
        };

        loop {
            recorder.set_board(state.board.clone());
            if let Some(status) = state.game_status.terminal() {
                let reason = if status == GameStatus::Draw {
                    EndReason::Draw
                } else {
                    EndReason::Win
                };
                return (status, reason);
            }
            if recorder.move_count() >= max_moves {
                error!("{game_id} still ongoing after {max_moves} accepted moves");
                return (GameStatus::Error, EndReason::ServerError);
            }

            let color = state.current_player;
            recorder.set_mover(color);
            let agent = match color {
                Color::Black => black,
                Color::White => white,
            };
            let request = MoveRequest {
                game_id: game_id.clone(),
                board: state.board.clone(),
                current_player: color,
            };

            let dispatched = Instant::now();
            let reply = match request_move(agent, request, color, self.settings.move_deadline) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{} loses {game_id}: {e}", agent.id);
                    return lost_by(&e);
                }
            };
            recorder.record_thinking(
                color,
                dispatched.elapsed().min(self.settings.move_deadline),
            );

            match self.server.submit_move(&game_id, color, reply.position) {
                Ok(next) => {
                    recorder.push_move(color, reply.position);
                    state = next;
                }
                Err(ServerError::Rejected(reason)) => {
                    let e = ArenaError::IllegalMove { color, reason };
                    warn!("{} loses {game_id} at {}: {e}", agent.id, reply.position);
                    return lost_by(&e);
                }
                Err(ServerError::Unavailable(reason)) => {
                    error!("game server failed during {game_id}: {reason}");
                    return (GameStatus::Error, EndReason::ServerError);
                }
            }
        }
    }
}

/// Terminal status and reason of a session lost by the side designated by `error`.
fn lost_by(error: &ArenaError) -> (GameStatus, EndReason) {
    let reason = match error {
        ArenaError::Timeout { .. } => EndReason::Timeout,
        ArenaError::IllegalMove { .. } => EndReason::IllegalMove,
        _ => EndReason::TransportError,
    };
    match error.loser() {
        Some(loser) => (loser.opponent().win_status(), reason),
        None => (GameStatus::Error, EndReason::ServerError),
    }
}

/// Asks `agent` for a move, giving up after `deadline`.
///
/// The call runs on its own thread; on timeout the receiving end is dropped so a late answer
/// is thrown away and never retried.
fn request_move(
    agent: &Agent,
    request: MoveRequest,
    color: Color,
    deadline: Duration,
) -> Result<MoveReply, ArenaError> {
    let (tx, rx) = mpsc::channel();
    let endpoint = Arc::clone(agent.endpoint());
    let transport_timeout = deadline.saturating_add(TRANSPORT_SLACK);

    thread::Builder::new()
        .name(format!("move-{}", agent.id))
        .spawn(move || {
            let reply = endpoint.request_move(&request, transport_timeout);
            // fails if the deadline passed: the answer is dropped
            let _ = tx.send(reply);
        })
        .map_err(|e| ArenaError::Transport {
            color,
            reason: format!("could not start move request: {e}"),
        })?;

    match rx.recv_timeout(deadline) {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(ArenaError::Transport {
            color,
            reason: format!("{e:#}"),
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ArenaError::Timeout { color }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ArenaError::Transport {
            color,
            reason: "move request ended without an answer".to_owned(),
        }),
    }
}

/// Both agents of a session. Leaves the game when dropped.
struct Seats<'a> {
    game_id: &'a str,
    agents: [&'a Agent; 2],
}

impl<'a> Seats<'a> {
    /// `agents` is `[black, white]`.
    fn join(game_id: &'a str, agents: [&'a Agent; 2], server_address: &str) -> Seats<'a> {
        let seats = Seats { game_id, agents };
        for (agent, color) in agents.iter().zip([Color::Black, Color::White]) {
            let request = JoinRequest {
                game_id: game_id.to_owned(),
                my_color: color,
                game_server_url: server_address.to_owned(),
            };
            match agent.endpoint().join(&request) {
                Ok(()) => debug!("{} joined {game_id} as {color}", agent.id),
                Err(e) => warn!("{} could not join {game_id}: {e:#}", agent.id),
            }
        }
        seats
    }
}

impl Drop for Seats<'_> {
    fn drop(&mut self) {
        for agent in self.agents {
            match agent.endpoint().leave(self.game_id) {
                Ok(()) => debug!("{} left {}", agent.id, self.game_id),
                Err(e) => warn!("{} could not leave {}: {e:#}", agent.id, self.game_id),
            }
        }
    }
}
