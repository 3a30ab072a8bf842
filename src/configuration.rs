//! Tournament input and arena behaviours.
//!
//! Two layers of configuration are used:
//!
//! - [`ArenaConfig`]: *what* to run. The game server, the agents and the tournament rules. It is
//!   a plain `serde` structure; load it from any format you like.
//! - [`Configuration`]: *how* to run it. Verbosity, logging, parallelism, probe timeouts and
//!   retries. Created programmatically with [`Configuration::new()`] or from environment
//!   variables with [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive, set them to `"true"` to enable.
//!
//! - `ARENA_VERBOSE` — Print finished sessions to stdout (default: `true`)
//! - `ARENA_LOG` — Enable logging to a file (default: `false`)
//! - `ARENA_RECORD_HISTORY` — Keep every move of every session in the final state (default: `true`)
//! - `ARENA_MAX_PARALLEL_GAMES` — Worker pool size (default: number of physical CPUs)
//! - `ARENA_HEALTH_TIMEOUT_MS` — Timeout of each health probe (default: `3000`)
//! - `ARENA_CREATE_GAME_ATTEMPTS` — Attempts at creating a game before giving up (default: `3`)
//! - `ARENA_RETRY_BACKOFF_MS` — First backoff between those attempts, doubled each time (default: `200`)

use std::{collections::HashSet, time::Duration};

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) record_history: bool,
    pub(crate) max_parallel_games: usize,
    pub(crate) health_timeout: Duration,
    pub(crate) create_game_attempts: u32,
    pub(crate) retry_backoff: Duration,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Finished sessions are printed to stdout.
    /// - Logging to file is disabled.
    /// - Full session history is kept.
    /// - As many sessions run in parallel as there are physical CPUs.
    /// - Health probes time out after 3 seconds.
    /// - Game creation is attempted 3 times, with a 200ms backoff doubled on each retry.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            record_history: true,
            max_parallel_games: num_cpus::get_physical().max(1),
            health_timeout: Duration::from_secs(3),
            create_game_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any unset or
    /// unparsable value falls back to the default of [`Configuration::new()`].
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let default = Self::new();
        Self {
            verbose: get_env_flag("ARENA_VERBOSE", default.verbose),
            log: get_env_flag("ARENA_LOG", default.log),
            record_history: get_env_flag("ARENA_RECORD_HISTORY", default.record_history),
            max_parallel_games: get_env_number::<usize>("ARENA_MAX_PARALLEL_GAMES")
                .filter(|n| *n > 0)
                .unwrap_or(default.max_parallel_games),
            health_timeout: get_env_number("ARENA_HEALTH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.health_timeout),
            create_game_attempts: get_env_number::<u32>("ARENA_CREATE_GAME_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(default.create_game_attempts),
            retry_backoff: get_env_number("ARENA_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.retry_backoff),
        }
    }

    /// Enable or disable printing finished sessions to stdout.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Keep (or drop) the per-session move lists and boards in the final state.
    ///
    /// Aggregated statistics are computed incrementally either way.
    pub fn with_record_history(mut self, value: bool) -> Self {
        self.record_history = value;
        self
    }

    /// Maximum number of sessions running at the same time. Clamped to at least one.
    pub fn with_max_parallel_games(mut self, value: usize) -> Self {
        self.max_parallel_games = value.max(1);
        self
    }

    /// Timeout of each health probe. Should be much smaller than the move deadline.
    pub fn with_health_timeout(mut self, value: Duration) -> Self {
        self.health_timeout = value;
        self
    }

    /// Number of attempts at creating a game, and the first backoff between them.
    pub fn with_create_game_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.create_game_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a tournament needs to know about its participants and rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Where games are hosted.
    pub game_server: GameServerConfig,
    /// Participants, in registration order.
    pub ais: Vec<AiConfig>,
    /// Tournament rules.
    #[serde(default)]
    pub tournament: TournamentConfig,
}

/// Game server section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameServerConfig {
    /// Base URL of the game server.
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Move deadline, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Side length of the board.
    #[serde(default = "default_board_size")]
    pub board_size: usize,
}

fn default_server_url() -> String {
    "http://localhost:10000".to_owned()
}

fn default_timeout() -> u64 {
    10
}

fn default_board_size() -> usize {
    15
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            timeout: default_timeout(),
            board_size: default_board_size(),
        }
    }
}

impl GameServerConfig {
    /// Deadline of a single move request.
    pub fn move_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// One agent entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Unique id.
    pub ai_id: String,
    /// Display name.
    pub ai_name: String,
    /// Port of the agent service.
    pub port: u16,
    /// Free text.
    #[serde(default)]
    pub description: Option<String>,
    /// Host of the agent service.
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_host() -> String {
    "localhost".to_owned()
}

impl AiConfig {
    /// Base URL of the agent service.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Tournament section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    /// Games played by each pair; colors alternate between them.
    #[serde(default = "default_rounds")]
    pub rounds_per_match: usize,
    /// Pause between two session dispatches, in seconds.
    #[serde(default)]
    pub delay_between_games: f64,
    /// Maximum number of games per agent. `None` (or `0`) means no cap.
    #[serde(default)]
    pub max_games_per_ai: Option<usize>,
}

fn default_rounds() -> usize {
    2
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            rounds_per_match: default_rounds(),
            delay_between_games: 0.0,
            max_games_per_ai: None,
        }
    }
}

impl TournamentConfig {
    /// Pause between two session dispatches.
    pub fn pacing(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_between_games).unwrap_or(Duration::ZERO)
    }

    /// The effective per-agent cap.
    pub fn game_cap(&self) -> Option<usize> {
        self.max_games_per_ai.filter(|cap| *cap > 0)
    }

    /// Rejects zero rounds and negative or non-finite delays.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rounds_per_match == 0 {
            bail!("rounds_per_match must be at least 1");
        }
        let delay = self.delay_between_games;
        if !delay.is_finite() || delay < 0.0 {
            bail!("delay_between_games must be a non-negative number of seconds, got {delay}");
        }
        Ok(())
    }
}

impl ArenaConfig {
    /// Rejects configurations a tournament cannot be run with.
    ///
    /// # Errors
    /// No agent, duplicated `ai_id`, zero rounds, zero timeout, zero board size or a negative
    /// delay.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ais.is_empty() {
            bail!("no agent configured");
        }
        let mut ids = HashSet::new();
        for ai in &self.ais {
            if ai.ai_id.is_empty() {
                bail!("agent '{}' has an empty id", ai.ai_name);
            }
            if !ids.insert(ai.ai_id.as_str()) {
                bail!("duplicated agent id '{}'", ai.ai_id);
            }
        }
        self.tournament.validate()?;
        if self.game_server.timeout == 0 {
            bail!("game_server.timeout must be at least one second");
        }
        if self.game_server.board_size == 0 {
            bail!("game_server.board_size must be positive");
        }
        Ok(())
    }
}
