//! Failure taxonomy of a tournament run.
//!
//! Most of these never reach the caller: per-session failures are converted into a terminal
//! [`GameSession`](crate::session::GameSession) by the session controller. Only
//! [`ArenaError::GameServerUnavailable`] and [`ArenaError::InvalidConfig`] can abort a call to
//! [`Arena::run`](crate::arena::Arena::run).

use thiserror::Error;

use crate::session::Color;

/// Classified failure of an agent, a move or the game server.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Agent did not answer its health probe, or answered "not ready".
    #[error("agent '{agent}' failed its health check: {reason}")]
    HealthCheckFailure {
        /// Id of the excluded agent.
        agent: String,
        /// What went wrong.
        reason: String,
    },

    /// No move was received before the deadline.
    #[error("{color} did not answer within the move deadline")]
    Timeout {
        /// Side that was to move.
        color: Color,
    },

    /// The move request failed or its answer was malformed.
    #[error("transport error while asking {color} for a move: {reason}")]
    Transport {
        /// Side that was to move.
        color: Color,
        /// What went wrong.
        reason: String,
    },

    /// The game server refused the submitted coordinate.
    #[error("{color} played an illegal move: {reason}")]
    IllegalMove {
        /// Side that was to move.
        color: Color,
        /// Rejection message of the game server.
        reason: String,
    },

    /// The game server cannot be reached (or keeps failing).
    #[error("game server unavailable: {0}")]
    GameServerUnavailable(String),

    /// The tournament configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ArenaError {
    /// Side that loses the session because of this error, if any.
    pub fn loser(&self) -> Option<Color> {
        match self {
            ArenaError::Timeout { color }
            | ArenaError::Transport { color, .. }
            | ArenaError::IllegalMove { color, .. } => Some(*color),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_failures_designate_the_mover() {
        let err = ArenaError::Timeout {
            color: Color::White,
        };
        assert_eq!(err.loser(), Some(Color::White));

        let err = ArenaError::IllegalMove {
            color: Color::Black,
            reason: "occupied".into(),
        };
        assert_eq!(err.loser(), Some(Color::Black));
        assert!(err.to_string().contains("occupied"));

        assert_eq!(ArenaError::GameServerUnavailable("down".into()).loser(), None);
    }
}
