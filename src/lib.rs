//! # Agent Arena
//!
//! A tournament runner for independently hosted, network-reachable board game agents.
//!
//! It provides:
//! - Health checks of the agents and of the game server ([`HealthMonitor`](crate::health_monitor::HealthMonitor))
//! - Round-robin scheduling with alternating colors and an optional per-agent cap ([`schedule`])
//! - Session execution with a per-move deadline and a guaranteed join/leave lifecycle ([`match_runner`])
//! - Win/draw/loss matrix and timing statistics ([`stats`])
//! - An orchestrator running all of the above on a bounded pool of threads ([`Arena`](crate::arena::Arena))
//!
//! The rules of the game are not implemented here: a separate game server owns the board,
//! validates moves and declares the winner. Agents are separate services too. Both are reached
//! through the [`GameServer`](crate::game_interface::GameServer) and
//! [`AgentEndpoint`](crate::game_interface::AgentEndpoint) traits, implemented over HTTP in
//! [`http`].
//!
//! # Documentation Overview
//!
//! - For the lifecycle of a tournament and its failure modes, see the [`arena`] module.
//! - For the lifecycle of a single game (join, moves, leave, timeouts), see [`match_runner`].
//! - For the tournament input and the arena behaviors, see [`configuration`].
//! - For the exported results, see [`TournamentState`](crate::stats::TournamentState).
//!
//! # Usage Example
//!
//! ```no_run
//! use agent_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let tournament: ArenaConfig = serde_json::from_str(
//!         r#"{
//!             "game_server": {"url": "http://localhost:10000", "timeout": 10, "board_size": 15},
//!             "ais": [
//!                 {"ai_id": "AI_Alpha", "ai_name": "Alpha", "port": 11001},
//!                 {"ai_id": "AI_Beta", "ai_name": "Beta", "port": 11002}
//!             ],
//!             "tournament": {"rounds_per_match": 2, "delay_between_games": 0.5}
//!         }"#,
//!     )?;
//!
//!     let config = Configuration::from_env().with_max_parallel_games(2);
//!     let arena = Arena::new(tournament, config)?;
//!     let state = arena.run()?;
//!
//!     for row in state.summary() {
//!         println!(
//!             "{}: {}W {}D {}L ({:.2}s per move)",
//!             row.name, row.wins, row.draws, row.losses, row.avg_thinking_secs
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Agent Requirements
//!
//! An agent is an HTTP service exposing:
//!  * `GET /health` answering `{"status": "healthy"}` when ready
//!  * `GET /info`
//!  * `POST /join_game` with `{game_id, my_color, game_server_url}`
//!  * `POST /get_move` with `{game_id, board, current_player}`, answering `{"move": [x, y], "reasoning": ...}`
//!    before the move deadline
//!  * `POST /leave_game` with `{game_id}`
//!
//! An agent plays at most one game at a time; the arena never schedules two concurrent games
//! for the same agent.
#![warn(missing_docs)]

pub use anyhow;
pub mod agent;
pub mod arena;
pub mod configuration;
pub mod error;
pub mod game_interface;
pub mod health_monitor;
pub mod http;
mod logger;
pub mod match_runner;
pub mod schedule;
pub mod session;
pub mod stats;
mod tournament_scheduler;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use agent_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena)
/// - [`ArenaConfig`](crate::configuration::ArenaConfig) and [`Configuration`](crate::configuration::Configuration)
/// - [`ArenaError`](crate::error::ArenaError)
/// - the remote party traits and the result types
pub mod prelude {
    pub use crate::agent::Agent;
    pub use crate::arena::Arena;
    pub use crate::configuration::{
        AiConfig, ArenaConfig, Configuration, GameServerConfig, TournamentConfig,
    };
    pub use crate::error::ArenaError;
    pub use crate::game_interface::{AgentEndpoint, GameServer};
    pub use crate::match_runner::SessionSettings;
    pub use crate::session::{Color, EndReason, GameSession, GameStatus, Position};
    pub use crate::stats::TournamentState;
}
