//! Outcome matrix and per-agent statistics.
//!
//! The [`StatsAggregator`] is the only writer of a [`TournamentState`]. Each session is
//! applied in a single locked update, so a [`StatsAggregator::snapshot`] taken from another
//! thread never observes a half-applied session.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::AgentProfile;
use crate::schedule::{OmittedPairing, Pairing};
use crate::session::{Color, EndReason, GameSession, GameStatus};

/// Win/draw/loss counts of one agent against one opponent (or overall).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct Outcome {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl Outcome {
    /// Completed games counted in this cell.
    pub fn games(&self) -> u32 {
        self.wins + self.draws + self.losses
    }
}

/// Aggregate row of one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentRow {
    /// Completed games played.
    pub games_played: u32,
    /// Wins, draws and losses over every opponent.
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Losses on timeout.
    pub timeouts: u32,
    /// Running mean of the thinking time, weighted by moves.
    pub mean_thinking_secs: f64,
    /// Answered move requests behind `mean_thinking_secs`.
    pub thinking_moves: u64,
}

impl AgentRow {
    fn add_thinking(&mut self, moves: u32, average: Duration) {
        if moves == 0 {
            return;
        }
        let total = self.thinking_moves + u64::from(moves);
        let weight = f64::from(moves) / total as f64;
        self.mean_thinking_secs += (average.as_secs_f64() - self.mean_thinking_secs) * weight;
        self.thinking_moves = total;
    }
}

/// Short account of one session, kept in its [`MatchRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Game id.
    pub id: String,
    /// Repeat index within the pair.
    pub repeat: usize,
    /// Agent on black.
    pub black: String,
    /// Agent on white.
    pub white: String,
    /// Outcome.
    pub game_status: GameStatus,
    /// Why it ended.
    pub end_reason: EndReason,
    /// Winning agent, if any.
    pub winner: Option<String>,
    /// Accepted moves.
    pub moves: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl From<&GameSession> for SessionSummary {
    fn from(session: &GameSession) -> Self {
        SessionSummary {
            id: session.id.clone(),
            repeat: session.pairing.repeat,
            black: session.pairing.black.clone(),
            white: session.pairing.white.clone(),
            game_status: session.game_status,
            end_reason: session.end_reason,
            winner: session.winner_id().map(str::to_owned),
            moves: session.moves.len(),
            duration: session.duration,
        }
    }
}

/// Every session played by one pair of agents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    /// Agent listed first.
    pub first: String,
    /// Agent listed second.
    pub second: String,
    /// Sessions, in completion order.
    pub sessions: Vec<SessionSummary>,
}

/// A scheduled repeat that never produced a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortedPairing {
    /// What was scheduled.
    pub pairing: Pairing,
    /// Why it did not run.
    pub reason: String,
}

/// Everything known about a tournament.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TournamentState {
    /// Identifier of the run.
    pub tournament_id: String,
    /// Every registered agent, healthy or not.
    pub agents: Vec<AgentProfile>,
    /// `matrix[a][b]` is the record of `a` against `b`. Every off-diagonal cell between
    /// participants exists, even with no game played.
    pub matrix: BTreeMap<String, BTreeMap<String, Outcome>>,
    /// Aggregate row per participant.
    pub rows: BTreeMap<String, AgentRow>,
    /// Session summaries per pair, keyed by `"first|second"`.
    pub match_records: BTreeMap<String, MatchRecord>,
    /// Full sessions, when history recording is enabled.
    pub history: Vec<GameSession>,
    /// Scheduled repeats that never ran.
    pub aborted: Vec<AbortedPairing>,
    /// Pairs left out because of the per-agent cap.
    pub omitted: Vec<OmittedPairing>,
    /// Sessions ended by a game server failure.
    pub errored_sessions: u32,
    /// No more sessions will be recorded.
    pub finalized: bool,
    /// Applied sessions, by game id and pairing: a game server may reuse ids.
    #[serde(skip)]
    seen: HashSet<(String, Pairing)>,
}

impl TournamentState {
    /// Empty state with a matrix prepared for `participants`.
    pub fn new(
        tournament_id: impl Into<String>,
        agents: Vec<AgentProfile>,
        participants: &[String],
    ) -> Self {
        let mut state = TournamentState {
            tournament_id: tournament_id.into(),
            agents,
            ..Default::default()
        };
        for a in participants {
            state.rows.entry(a.clone()).or_default();
            let row = state.matrix.entry(a.clone()).or_default();
            for b in participants.iter().filter(|b| *b != a) {
                row.entry(b.clone()).or_default();
            }
        }
        state
    }

    /// Applies one session. Returns false if the same session (game id and pairing) was
    /// already applied.
    pub fn apply(&mut self, session: &GameSession, keep_history: bool) -> bool {
        if !self
            .seen
            .insert((session.id.clone(), session.pairing.clone()))
        {
            return false;
        }

        let pairing = &session.pairing;
        let key = format!("{}|{}", pairing.first, pairing.second);
        self.match_records
            .entry(key)
            .or_insert_with(|| MatchRecord {
                first: pairing.first.clone(),
                second: pairing.second.clone(),
                sessions: vec![],
            })
            .sessions
            .push(SessionSummary::from(session));

        if session.is_completed() {
            for color in [Color::Black, Color::White] {
                let me = pairing.agent_for(color);
                let other = pairing.agent_for(color.opponent());
                let result = match session.game_status.winner() {
                    Some(winner) if winner == color => Outcome {
                        wins: 1,
                        ..Default::default()
                    },
                    Some(_) => Outcome {
                        losses: 1,
                        ..Default::default()
                    },
                    None => Outcome {
                        draws: 1,
                        ..Default::default()
                    },
                };

                let cell = self
                    .matrix
                    .entry(me.to_owned())
                    .or_default()
                    .entry(other.to_owned())
                    .or_default();
                cell.wins += result.wins;
                cell.draws += result.draws;
                cell.losses += result.losses;

                let row = self.rows.entry(me.to_owned()).or_default();
                row.games_played += 1;
                row.outcome.wins += result.wins;
                row.outcome.draws += result.draws;
                row.outcome.losses += result.losses;
                if result.losses == 1 && session.end_reason == EndReason::Timeout {
                    row.timeouts += 1;
                }
                let thinking = session.thinking(color);
                row.add_thinking(thinking.moves, thinking.average);
            }
        } else {
            self.errored_sessions += 1;
        }

        if keep_history {
            self.history.push(session.clone());
        }
        true
    }

    /// Summary table, best first: wins, then draws, descending.
    pub fn summary(&self) -> Vec<SummaryRow> {
        let mut rows = self
            .rows
            .iter()
            .map(|(id, row)| SummaryRow {
                agent: id.clone(),
                name: self
                    .agents
                    .iter()
                    .find(|a| &a.id == id)
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| id.clone()),
                wins: row.outcome.wins,
                draws: row.outcome.draws,
                losses: row.outcome.losses,
                games: row.games_played,
                timeouts: row.timeouts,
                avg_thinking_secs: row.mean_thinking_secs,
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| (b.wins, b.draws).cmp(&(a.wins, a.draws)));
        rows
    }

    /// Pairwise view of the matrix.
    pub fn pairwise(&self) -> MatrixView<'_> {
        MatrixView {
            matrix: &self.matrix,
        }
    }

    /// Full sessions, in completion order (empty unless history recording was enabled).
    pub fn history(&self) -> &[GameSession] {
        &self.history
    }
}

/// One line of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct SummaryRow {
    pub agent: String,
    pub name: String,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub games: u32,
    pub timeouts: u32,
    pub avg_thinking_secs: f64,
}

/// Read-only access to the outcome matrix.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct MatrixView<'a> {
    matrix: &'a BTreeMap<String, BTreeMap<String, Outcome>>,
}

impl MatrixView<'_> {
    /// Record of `a` against `b`; `None` on the diagonal or for unknown agents.
    pub fn get(&self, a: &str, b: &str) -> Option<Outcome> {
        if a == b {
            return None;
        }
        self.matrix.get(a)?.get(b).copied()
    }

    /// Row agents, sorted.
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.matrix.keys().map(String::as_str)
    }
}

/// Applies `sessions` in order to a fresh state.
pub fn aggregate<'a>(
    tournament_id: &str,
    participants: &[String],
    sessions: impl IntoIterator<Item = &'a GameSession>,
    keep_history: bool,
) -> TournamentState {
    let mut state = TournamentState::new(tournament_id, vec![], participants);
    for session in sessions {
        state.apply(session, keep_history);
    }
    state
}

/// Shared handle on the tournament state.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    state: Arc<Mutex<TournamentState>>,
    keep_history: bool,
}

impl StatsAggregator {
    /// Wraps `state`.
    pub fn new(state: TournamentState, keep_history: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            keep_history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TournamentState> {
        // a poisoned state may hold a partly applied session; keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the whole state, at the start of a run.
    pub(crate) fn reset(&self, state: TournamentState) {
        *self.lock() = state;
    }

    /// Consumes a finished session; duplicates are ignored.
    pub fn record(&self, session: &GameSession) {
        let mut state = self.lock();
        if state.finalized {
            warn!("session {} arrived after finalization, ignored", session.id);
            return;
        }
        if state.apply(session, self.keep_history) {
            debug!("session {} aggregated", session.id);
        } else {
            warn!("session {} was already aggregated, ignored", session.id);
        }
    }

    /// Logs a repeat that will never produce a session.
    pub fn record_aborted(&self, pairing: Pairing, reason: impl Into<String>) {
        self.lock().aborted.push(AbortedPairing {
            pairing,
            reason: reason.into(),
        });
    }

    /// Logs pairs left out by the scheduler.
    pub fn record_omitted(&self, omitted: impl IntoIterator<Item = OmittedPairing>) {
        self.lock().omitted.extend(omitted);
    }

    /// Closes the state.
    pub fn finalize(&self) -> TournamentState {
        let mut state = self.lock();
        state.finalized = true;
        state.clone()
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> TournamentState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::{Move, Position, ThinkingTime};

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn session(id: &str, pairing: Pairing, status: GameStatus, reason: EndReason) -> GameSession {
        GameSession {
            id: id.into(),
            pairing,
            moves: vec![Move {
                color: Color::Black,
                position: Position(7, 7),
                at: Duration::from_millis(5),
            }],
            final_board: vec![],
            final_mover: Some(Color::White),
            last_move: Some(Position(7, 7)),
            game_status: status,
            end_reason: reason,
            duration: Duration::from_millis(20),
            black_thinking: ThinkingTime {
                moves: 1,
                average: Duration::from_millis(100),
            },
            white_thinking: ThinkingTime::default(),
            server_history: None,
        }
    }

    fn sample() -> Vec<GameSession> {
        vec![
            session("g1", Pairing::new("a", "b", 0), GameStatus::BlackWin, EndReason::Win),
            session("g2", Pairing::new("a", "b", 1), GameStatus::Draw, EndReason::Draw),
            session("g3", Pairing::new("a", "c", 0), GameStatus::WhiteWin, EndReason::Timeout),
            session("g4", Pairing::new("b", "c", 0), GameStatus::Error, EndReason::ServerError),
        ]
    }

    #[test]
    fn matrix_is_antisymmetric() {
        let participants = ids(&["a", "b", "c"]);
        let state = aggregate("t", &participants, &sample(), true);
        let m = state.pairwise();
        for a in &participants {
            let mut row_total = 0;
            for b in participants.iter().filter(|b| *b != a) {
                let ab = m.get(a, b).unwrap();
                let ba = m.get(b, a).unwrap();
                assert_eq!(ab.wins, ba.losses);
                assert_eq!(ab.draws, ba.draws);
                row_total += ab.games();
            }
            assert_eq!(row_total, state.rows[a].games_played);
        }
        assert_eq!(m.get("a", "a"), None);
        assert_eq!(m.get("b", "c").unwrap().games(), 0);
        assert_eq!(state.errored_sessions, 1);
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.match_records["a|b"].sessions.len(), 2);
    }

    #[test]
    fn timeouts_are_counted_for_the_loser() {
        let state = aggregate("t", &ids(&["a", "b", "c"]), &sample(), false);
        // g3: a is black and timed out
        assert_eq!(state.rows["a"].timeouts, 1);
        assert_eq!(state.rows["c"].outcome.wins, 1);
        assert!(state.history.is_empty());
    }

    #[test]
    fn aggregation_is_idempotent() {
        let participants = ids(&["a", "b", "c"]);
        let sessions = sample();
        let once = aggregate("t", &participants, &sessions, true);
        let twice = aggregate("t", &participants, sessions.iter().chain(&sessions), true);
        assert_eq!(once, twice);
    }

    #[test]
    fn reused_game_id_is_kept_for_another_pairing() {
        let participants = ids(&["a", "b", "c"]);
        let sessions = [
            session("g1", Pairing::new("a", "b", 0), GameStatus::BlackWin, EndReason::Win),
            session("g1", Pairing::new("a", "c", 0), GameStatus::BlackWin, EndReason::Win),
        ];
        let state = aggregate("t", &participants, &sessions, false);
        assert_eq!(state.rows["a"].games_played, 2);
        assert_eq!(state.match_records["a|b"].sessions.len(), 1);
        assert_eq!(state.match_records["a|c"].sessions.len(), 1);
    }

    #[test]
    fn thinking_mean_is_weighted_by_moves() {
        let mut row = AgentRow::default();
        row.add_thinking(1, Duration::from_secs(4));
        row.add_thinking(3, Duration::from_secs(0));
        assert_eq!(row.thinking_moves, 4);
        assert!((row.mean_thinking_secs - 1.0).abs() < 1e-9);
        row.add_thinking(0, Duration::from_secs(100));
        assert!((row.mean_thinking_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn summary_is_sorted_by_wins_then_draws() {
        let state = aggregate("t", &ids(&["a", "b", "c"]), &sample(), false);
        let order = state
            .summary()
            .into_iter()
            .map(|r| (r.agent, r.wins, r.draws))
            .collect::<Vec<_>>();
        // a: 1W 1D, c: 1W 0D, b: 0W 1D
        assert_eq!(
            order,
            vec![
                ("a".to_string(), 1, 1),
                ("c".to_string(), 1, 0),
                ("b".to_string(), 0, 1)
            ]
        );
    }

    #[test]
    fn finalized_state_ignores_late_sessions() {
        let aggregator = StatsAggregator::new(TournamentState::new("t", vec![], &ids(&["a", "b"])), true);
        let sessions = sample();
        aggregator.record(&sessions[0]);
        aggregator.record(&sessions[0]);
        let done = aggregator.finalize();
        aggregator.record(&sessions[1]);
        assert!(done.finalized);
        assert_eq!(aggregator.snapshot(), done);
        assert_eq!(done.rows["a"].games_played, 1);
    }
}
