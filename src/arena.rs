//! Tournament orchestration.
//!
//! [`Arena`] drives a whole run:
//!
//! 1. probe the game server and every agent ([`HealthMonitor`]),
//! 2. build the round-robin [`Schedule`] over the healthy agents,
//! 3. dispatch sessions to worker threads, at most `max_parallel_games` at once and never two
//!    sessions sharing an agent,
//! 4. receive every result on a channel and hand it to the [`StatsAggregator`],
//! 5. return the finalized [`TournamentState`].
//!
//! The main loop is the only consumer of session results, so the tournament state has a
//! single writer. Other threads can follow the run through [`Arena::aggregator`].
//!
//! # Failures
//!
//! - An agent failing its health probe is left out of the schedule; the run goes on.
//! - A game server failing its health probe stops the run before anything is scheduled:
//!   [`Arena::run`] returns [`ArenaError::GameServerUnavailable`].
//! - A game that cannot be created (after retries) aborts its repeat and halts the rest of
//!   the schedule. Sessions already running are drained and the partial state is returned.
//! - A panicking session aborts its own repeat only.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use time::OffsetDateTime;
use tracing::{error, info, instrument, trace, warn};

use crate::agent::Agent;
use crate::configuration::{ArenaConfig, Configuration, TournamentConfig};
use crate::error::ArenaError;
use crate::game_interface::GameServer;
use crate::health_monitor::HealthMonitor;
use crate::http::{HttpAgent, HttpGameServer};
use crate::logger::init_logger;
use crate::match_runner::{SessionController, SessionOutcome, SessionSettings};
use crate::schedule::{Pairing, Schedule};
use crate::session::{EndReason, GameSession};
use crate::stats::{StatsAggregator, TournamentState};
use crate::tournament_scheduler::{Pacer, SessionTicket, TournamentScheduler};

/// What a worker thread sends back.
enum Report {
    Outcome(SessionOutcome),
    Failed { pairing: Pairing, reason: String },
}

impl Report {
    fn pairing(&self) -> &Pairing {
        match self {
            Report::Outcome(outcome) => outcome.pairing(),
            Report::Failed { pairing, .. } => pairing,
        }
    }
}

/// Runs a round-robin tournament between remote agents.
pub struct Arena {
    server: Arc<dyn GameServer>,
    agents: Vec<Agent>,
    tournament: TournamentConfig,
    session: SessionSettings,
    config: Configuration,
    aggregator: StatsAggregator,
}

impl Arena {
    /// Builds an arena talking HTTP to the configured game server and agents.
    ///
    /// # Errors
    /// [`ArenaError::InvalidConfig`] if the configuration does not validate or a URL is unusable.
    #[instrument(skip_all)]
    pub fn new(arena_config: ArenaConfig, config: Configuration) -> Result<Arena, ArenaError> {
        let invalid = |e: anyhow::Error| ArenaError::InvalidConfig(format!("{e:#}"));
        arena_config.validate().map_err(invalid)?;

        let server = HttpGameServer::new(&arena_config.game_server.url).map_err(invalid)?;
        let agents = arena_config
            .ais
            .iter()
            .map(|ai| {
                let url = ai.url();
                let endpoint = HttpAgent::new(&url)?;
                Ok(Agent::new(
                    ai.ai_id.as_str(),
                    ai.ai_name.as_str(),
                    url,
                    ai.description.clone(),
                    Arc::new(endpoint),
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(invalid)?;

        let mut session = SessionSettings::new(arena_config.game_server.move_deadline());
        session.board_size = arena_config.game_server.board_size;

        Self::with_endpoints(
            Arc::new(server),
            agents,
            arena_config.tournament,
            session,
            config,
        )
    }

    /// Builds an arena over already constructed endpoints.
    ///
    /// Retry settings of `session` are taken from `config`.
    ///
    /// # Errors
    /// [`ArenaError::InvalidConfig`] on duplicated agent ids or unusable tournament settings.
    pub fn with_endpoints(
        server: Arc<dyn GameServer>,
        agents: Vec<Agent>,
        tournament: TournamentConfig,
        mut session: SessionSettings,
        config: Configuration,
    ) -> Result<Arena, ArenaError> {
        if config.log {
            if let Err(e) = init_logger() {
                warn!("file logging disabled: {e:#}");
            }
        }
        trace!(?config, ?tournament, ?session);

        tournament
            .validate()
            .map_err(|e| ArenaError::InvalidConfig(format!("{e:#}")))?;
        let mut ids = HashSet::new();
        if let Some(dup) = agents.iter().find(|a| !ids.insert(a.id.as_str())) {
            return Err(ArenaError::InvalidConfig(format!(
                "duplicated agent id '{}'",
                dup.id
            )));
        }

        session.create_game_attempts = config.create_game_attempts;
        session.retry_backoff = config.retry_backoff;

        Ok(Arena {
            server,
            agents,
            tournament,
            session,
            config,
            aggregator: StatsAggregator::new(TournamentState::default(), config.record_history),
        })
    }

    /// Handle on the live tournament state, for snapshots taken while [`Arena::run`] is going.
    pub fn aggregator(&self) -> StatsAggregator {
        self.aggregator.clone()
    }

    /// Runs the whole tournament.
    ///
    /// # Errors
    /// [`ArenaError::GameServerUnavailable`] if the game server fails its health check. Every
    /// later failure is recorded in the returned state instead.
    #[instrument(skip_all)]
    pub fn run(self) -> Result<TournamentState, ArenaError> {
        let Arena {
            server,
            agents,
            tournament,
            session,
            config,
            aggregator,
        } = self;

        // 1. health checks
        let report = HealthMonitor::new(config.health_timeout).check(server.as_ref(), agents);
        if let Some(reason) = report.game_server_failure {
            error!("aborting tournament: game server {} is unhealthy", server.address());
            return Err(ArenaError::GameServerUnavailable(reason));
        }
        let participants = report.healthy();
        let ids = participants.iter().map(|a| a.id.clone()).collect::<Vec<_>>();
        if participants.len() < 2 {
            warn!("only {} healthy agent(s), no game to play", participants.len());
        }

        let tournament_id = format!("tournament_{}", OffsetDateTime::now_utc().unix_timestamp());
        let profiles = report.agents.iter().map(|a| a.profile()).collect();
        aggregator.reset(TournamentState::new(tournament_id.as_str(), profiles, &ids));

        // 2. schedule
        let schedule = Schedule::round_robin(
            &participants,
            tournament.rounds_per_match,
            tournament.game_cap(),
        );
        aggregator.record_omitted(schedule.omitted.iter().cloned());
        info!(
            "{tournament_id}: {} agents, {} games scheduled",
            participants.len(),
            schedule.pairings.len()
        );

        // 3. dispatch and collect
        let mut scheduler =
            TournamentScheduler::new(&participants, &schedule, config.max_parallel_games);
        let controller = SessionController::new(server, session);
        let mut pacer = Pacer::new(tournament.pacing());
        let (tx_result, rx_result) = mpsc::channel();
        let mut running: Vec<Pairing> = vec![];
        let _wrap = config.verbose.then(LineWrapGuard::disable);

        let mut launch = |ticket: SessionTicket, running: &mut Vec<Pairing>| {
            pacer.wait();
            running.push(ticket.pairing.clone());
            if config.verbose {
                print_running_sessions(running);
            }
            launch_session(ticket, &controller, tx_result.clone());
        };

        for ticket in scheduler.advance() {
            launch(ticket, &mut running);
        }

        let mut halted = false;
        while !scheduler.is_finished() {
            // not finished <=> session running <=> result to receive
            let Ok(report) = rx_result.recv() else {
                error!("result channel closed with {} sessions running", scheduler.running());
                break;
            };
            let pairing = report.pairing().clone();
            if let Some(pos) = running.iter().position(|p| *p == pairing) {
                running.remove(pos);
            }

            match report {
                Report::Outcome(SessionOutcome::Finished(session)) => {
                    if config.verbose {
                        print_session_result(&session);
                    }
                    aggregator.record(&session);
                }
                Report::Outcome(SessionOutcome::Aborted { pairing, error }) => {
                    if config.verbose {
                        print_aborted(&pairing, &error.to_string());
                    }
                    let fatal = matches!(error, ArenaError::GameServerUnavailable(_));
                    aggregator.record_aborted(pairing, error.to_string());
                    if fatal && !halted {
                        halted = true;
                        let dropped = scheduler.halt();
                        error!(
                            "game server unavailable, {} pending games aborted, draining {} running",
                            dropped.len(),
                            scheduler.running() - 1
                        );
                        for p in dropped {
                            aggregator.record_aborted(p, "not started: game server unavailable");
                        }
                    }
                }
                Report::Failed { pairing, reason } => {
                    if config.verbose {
                        print_aborted(&pairing, &reason);
                    }
                    aggregator.record_aborted(pairing, reason);
                }
            }

            for ticket in scheduler.on_result(&pairing) {
                launch(ticket, &mut running);
            }
        }

        let state = aggregator.finalize();
        info!(
            "{} finished: {} sessions, {} aborted, {} errored",
            state.tournament_id,
            state.match_records.values().map(|r| r.sessions.len()).sum::<usize>(),
            state.aborted.len(),
            state.errored_sessions
        );
        Ok(state)
    }
}

/// Runs `ticket` on its own thread. Exactly one [`Report`] is sent back, even on panic.
fn launch_session(ticket: SessionTicket, controller: &SessionController, tx_result: Sender<Report>) {
    let controller = controller.clone();
    let pairing = ticket.pairing.clone();
    let tx = tx_result.clone();

    let spawned = thread::Builder::new()
        .name(format!("session {pairing}"))
        .spawn(move || {
            let SessionTicket {
                pairing,
                black,
                white,
            } = ticket;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                controller.run(&pairing, &black, &white)
            }));
            let report = match result {
                Ok(outcome) => Report::Outcome(outcome),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_owned());
                    error!("session {pairing} panicked: {message}");
                    Report::Failed {
                        pairing,
                        reason: format!("session panicked: {message}"),
                    }
                }
            };
            // the main loop owns the receiver until every session reported
            let _ = tx.send(report);
        });

    if let Err(e) = spawned {
        error!("could not start session {pairing}: {e}");
        let _ = tx_result.send(Report::Failed {
            reason: format!("could not start session thread: {e}"),
            pairing,
        });
    }
}

fn print_session_result(session: &GameSession) {
    let winner = session.winner_id().unwrap_or("-");
    // clear line, green pairing, result, red reason if not a regular end
    let reason = match session.end_reason {
        EndReason::Win | EndReason::Draw => String::new(),
        other => other.to_string(),
    };
    println!(
        "\x1b[2K\x1b[32m{}: \x1b[39m{:?} winner={winner} moves={} \x1b[31m{reason}\x1b[39m\x1b[0G",
        session.pairing,
        session.game_status,
        session.moves.len()
    );
}

fn print_aborted(pairing: &Pairing, reason: &str) {
    println!("\x1b[2K\x1b[32m{pairing}: \x1b[31maborted: {reason}\x1b[39m\x1b[0G");
}

fn print_running_sessions(running: &[Pairing]) {
    // clear, green, default, start of line
    print!(
        "\x1b[2K\x1b[32mRunning...:\x1b[39m {}\x1b[0G",
        running
            .iter()
            .map(Pairing::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

/// Disables terminal line wrapping until dropped.
struct LineWrapGuard;

impl LineWrapGuard {
    fn disable() -> Self {
        print!("\x1b[?7l");
        LineWrapGuard
    }
}

impl Drop for LineWrapGuard {
    fn drop(&mut self) {
        print!("\x1b[?7h");
    }
}
