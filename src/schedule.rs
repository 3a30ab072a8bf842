//! Round-robin schedule generation.
//!
//! Every unordered pair of distinct healthy agents is scheduled `rounds_per_match` times.
//! Repeat `k` of a pair puts the first-listed agent on black when `k` is even and swaps the
//! colors when `k` is odd.
//!
//! # Per-agent cap
//!
//! With `max_games_per_ai` set, pairs are visited in registration order (`(0,1), (0,2), ...,
//! (1,2), ...`) and a pair is kept only if *both* agents can still play all its repeats.
//! Otherwise the whole pair is recorded in [`Schedule::omitted`]. Schedule order alone decides
//! which pairs are dropped.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::session::Color;

/// One scheduled game between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Pairing {
    /// Agent listed first (registered earlier).
    pub first: String,
    /// Agent listed second.
    pub second: String,
    /// Repeat index within the pair, from 0.
    pub repeat: usize,
    /// Agent playing black.
    pub black: String,
    /// Agent playing white.
    pub white: String,
}

impl Pairing {
    /// Builds repeat `repeat` of the pair `(first, second)`, assigning colors.
    pub fn new(first: impl Into<String>, second: impl Into<String>, repeat: usize) -> Pairing {
        let first = first.into();
        let second = second.into();
        let (black, white) = if repeat % 2 == 0 {
            (first.clone(), second.clone())
        } else {
            (second.clone(), first.clone())
        };
        Pairing {
            first,
            second,
            repeat,
            black,
            white,
        }
    }

    /// Id of the agent playing `color`.
    pub fn agent_for(&self, color: Color) -> &str {
        match color {
            Color::Black => &self.black,
            Color::White => &self.white,
        }
    }

    /// Color played by `agent_id`, if it takes part.
    pub fn color_of(&self, agent_id: &str) -> Option<Color> {
        if self.black == agent_id {
            Some(Color::Black)
        } else if self.white == agent_id {
            Some(Color::White)
        } else {
            None
        }
    }

    /// True if `agent_id` plays in this pairing.
    pub fn involves(&self, agent_id: &str) -> bool {
        self.first == agent_id || self.second == agent_id
    }

    /// Unordered identity of the pair, shared by all its repeats.
    pub fn pair_key(&self) -> (String, String) {
        (self.first.clone(), self.second.clone())
    }
}

impl Display for Pairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} VS {} #{}]", self.black, self.white, self.repeat + 1)
    }
}

/// A pair left out because of the per-agent cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OmittedPairing {
    /// Agent listed first.
    pub first: String,
    /// Agent listed second.
    pub second: String,
    /// Number of games that were not scheduled.
    pub games: usize,
    /// Agent(s) that had reached the cap.
    pub capped: Vec<String>,
}

/// Ordered list of games to play.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Games, in dispatch order. Repeats of a pair are consecutive.
    pub pairings: Vec<Pairing>,
    /// Pairs left out because of the cap.
    pub omitted: Vec<OmittedPairing>,
}

impl Schedule {
    /// Round-robin over `agents` (in the given order).
    ///
    /// `rounds_per_match` must be at least one; `max_games_per_ai = None` disables the cap.
    pub fn round_robin(
        agents: &[Arc<Agent>],
        rounds_per_match: usize,
        max_games_per_ai: Option<usize>,
    ) -> Schedule {
        assert!(rounds_per_match >= 1, "Must play at least one game per pair.");

        let mut schedule = Schedule::default();
        let mut scheduled: HashMap<&str, usize> = HashMap::new();

        for (i, a) in agents.iter().enumerate() {
            for b in agents.iter().skip(i + 1) {
                if let Some(cap) = max_games_per_ai {
                    let capped = [a, b]
                        .into_iter()
                        .filter(|agent| {
                            scheduled.get(agent.id.as_str()).copied().unwrap_or(0)
                                + rounds_per_match
                                > cap
                        })
                        .map(|agent| agent.id.clone())
                        .collect::<Vec<_>>();
                    if !capped.is_empty() {
                        warn!(
                            "pair {} VS {} omitted: cap of {cap} games reached by {capped:?}",
                            a.id, b.id
                        );
                        schedule.omitted.push(OmittedPairing {
                            first: a.id.clone(),
                            second: b.id.clone(),
                            games: rounds_per_match,
                            capped,
                        });
                        continue;
                    }
                }

                for repeat in 0..rounds_per_match {
                    schedule
                        .pairings
                        .push(Pairing::new(a.id.as_str(), b.id.as_str(), repeat));
                }
                *scheduled.entry(a.id.as_str()).or_default() += rounds_per_match;
                *scheduled.entry(b.id.as_str()).or_default() += rounds_per_match;
            }
        }

        info!(
            "schedule: {} games, {} pairs omitted",
            schedule.pairings.len(),
            schedule.omitted.len()
        );
        schedule
    }

    /// Number of games each agent is scheduled for.
    pub fn games_per_agent(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for p in &self.pairings {
            *counts.entry(p.first.clone()).or_default() += 1;
            *counts.entry(p.second.clone()).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::game_interface::{
        AgentEndpoint, AgentHealth, AgentInfo, JoinRequest, MoveReply, MoveRequest,
    };

    struct Unreachable;

    impl AgentEndpoint for Unreachable {
        fn health(&self, _timeout: Duration) -> anyhow::Result<AgentHealth> {
            anyhow::bail!("unreachable")
        }
        fn info(&self, _timeout: Duration) -> anyhow::Result<AgentInfo> {
            anyhow::bail!("unreachable")
        }
        fn join(&self, _request: &JoinRequest) -> anyhow::Result<()> {
            anyhow::bail!("unreachable")
        }
        fn request_move(
            &self,
            _request: &MoveRequest,
            _timeout: Duration,
        ) -> anyhow::Result<MoveReply> {
            anyhow::bail!("unreachable")
        }
        fn leave(&self, _game_id: &str) -> anyhow::Result<()> {
            anyhow::bail!("unreachable")
        }
    }

    pub(crate) fn agents(ids: &[&str]) -> Vec<Arc<Agent>> {
        ids.iter()
            .map(|id| {
                Arc::new(Agent::new(
                    *id,
                    id.to_uppercase(),
                    format!("http://{id}"),
                    None,
                    Arc::new(Unreachable),
                ))
            })
            .collect()
    }

    #[test]
    fn three_agents_one_round() {
        let schedule = Schedule::round_robin(&agents(&["a", "b", "c"]), 1, None);
        let pairs = schedule
            .pairings
            .iter()
            .map(|p| (p.first.as_str(), p.second.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("b", "c")]);
        assert!(schedule.omitted.is_empty());
    }

    #[test]
    fn game_count_is_r_times_pairs() {
        for n in 2..7 {
            for r in 1..5 {
                let ids = (0..n).map(|i| format!("ai{i}")).collect::<Vec<_>>();
                let refs = ids.iter().map(String::as_str).collect::<Vec<_>>();
                let schedule = Schedule::round_robin(&agents(&refs), r, None);
                assert_eq!(schedule.pairings.len(), r * n * (n - 1) / 2);
                assert!(schedule
                    .games_per_agent()
                    .values()
                    .all(|games| *games == r * (n - 1)));
            }
        }
    }

    #[test]
    fn colors_alternate_between_repeats() {
        let schedule = Schedule::round_robin(&agents(&["a", "b"]), 4, None);
        let blacks = schedule
            .pairings
            .iter()
            .map(|p| p.black.as_str())
            .collect::<Vec<_>>();
        assert_eq!(blacks, vec!["a", "b", "a", "b"]);
        for p in &schedule.pairings {
            assert_ne!(p.black, p.white);
            assert!(p.involves("a") && p.involves("b"));
        }
    }

    #[test]
    fn nobody_always_holds_the_same_color() {
        let schedule = Schedule::round_robin(&agents(&["a", "b", "c", "d"]), 2, None);
        let mut colors: HashMap<((String, String), String), HashSet<Color>> = HashMap::new();
        for p in &schedule.pairings {
            for id in [&p.first, &p.second] {
                colors
                    .entry((p.pair_key(), id.clone()))
                    .or_default()
                    .insert(p.color_of(id).unwrap());
            }
        }
        assert!(colors.values().all(|set| set.len() == 2));
    }

    #[test]
    fn cap_drops_whole_pairs_in_schedule_order() {
        // a can play 4 games = 2 pairs of 2 repeats: (a,b) and (a,c) fit, (a,d) does not
        let schedule = Schedule::round_robin(&agents(&["a", "b", "c", "d"]), 2, Some(4));
        let counts = schedule.games_per_agent();
        assert!(counts.values().all(|games| *games <= 4));
        assert_eq!(counts["a"], 4);

        let omitted = schedule
            .omitted
            .iter()
            .map(|o| (o.first.as_str(), o.second.as_str()))
            .collect::<Vec<_>>();
        assert!(omitted.contains(&("a", "d")));
        assert_eq!(
            schedule.pairings.len() + omitted.len() * 2,
            2 * 4 * 3 / 2,
            "every pair is either scheduled or recorded"
        );
        assert!(schedule.omitted.iter().all(|o| !o.capped.is_empty()));
    }

    #[test]
    fn cap_smaller_than_a_pair_omits_everything() {
        let schedule = Schedule::round_robin(&agents(&["a", "b"]), 3, Some(2));
        assert!(schedule.pairings.is_empty());
        assert_eq!(schedule.omitted.len(), 1);
        assert_eq!(schedule.omitted[0].games, 3);
    }

    #[test]
    fn display_shows_colors_and_repeat() {
        assert_eq!(Pairing::new("x", "y", 1).to_string(), "[y VS x #2]");
    }
}
