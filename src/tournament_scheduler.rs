use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::agent::Agent;
use crate::schedule::{Pairing, Schedule};

/// A pairing ready to run, with its two agents resolved.
#[derive(Debug, Clone)]
pub(crate) struct SessionTicket {
    pub pairing: Pairing,
    pub black: Arc<Agent>,
    pub white: Arc<Agent>,
}

impl PartialEq for SessionTicket {
    fn eq(&self, other: &Self) -> bool {
        self.pairing == other.pairing
    }
}

impl Display for SessionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pairing)
    }
}

/// Hands out pairings to the worker pool.
///
/// A pairing is dispatched only when a worker slot is free and neither of its agents is
/// already playing: an agent endpoint hosts one game at a time.
pub(crate) struct TournamentScheduler {
    agents: HashMap<String, Arc<Agent>>,
    pending: Vec<Pairing>,
    busy: HashSet<String>,
    running_matches: usize,
    max_parallel: usize,
}

impl TournamentScheduler {
    pub fn new(agents: &[Arc<Agent>], schedule: &Schedule, max_parallel: usize) -> Self {
        TournamentScheduler {
            agents: agents.iter().map(|a| (a.id.clone(), a.clone())).collect(),
            pending: schedule.pairings.clone(),
            busy: HashSet::new(),
            running_matches: 0,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Takes every pending pairing that can start now, in schedule order.
    pub fn advance(&mut self) -> Vec<SessionTicket> {
        let mut matches_to_run = vec![];
        let mut remaining = vec![];

        for pairing in self.pending.drain(..) {
            let can_start = self.running_matches + matches_to_run.len() < self.max_parallel
                && !self.busy.contains(&pairing.black)
                && !self.busy.contains(&pairing.white);
            if !can_start {
                remaining.push(pairing);
                continue;
            }
            let (Some(black), Some(white)) = (
                self.agents.get(&pairing.black).cloned(),
                self.agents.get(&pairing.white).cloned(),
            ) else {
                // schedules are built from the same agent list
                warn!("dropping {pairing}: unknown agent");
                continue;
            };
            self.busy.insert(pairing.black.clone());
            self.busy.insert(pairing.white.clone());
            matches_to_run.push(SessionTicket {
                pairing,
                black,
                white,
            });
        }

        self.pending = remaining;
        self.running_matches += matches_to_run.len();
        trace!(
            started = matches_to_run.len(),
            running = self.running_matches,
            pending = self.pending.len()
        );
        matches_to_run
    }

    /// Frees the slot and the agents of a finished pairing, then dispatches what became possible.
    pub fn on_result(&mut self, pairing: &Pairing) -> Vec<SessionTicket> {
        self.busy.remove(&pairing.black);
        self.busy.remove(&pairing.white);
        self.running_matches -= 1;
        self.advance()
    }

    /// Stops dispatching. Returns the pairings that will never run.
    pub fn halt(&mut self) -> Vec<Pairing> {
        debug!("halting with {} pending pairings", self.pending.len());
        std::mem::take(&mut self.pending)
    }

    /// Nothing pending and nothing running.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.running_matches == 0
    }

    pub fn running(&self) -> usize {
        self.running_matches
    }
}

/// Enforces a minimum gap between two session dispatches.
#[derive(Debug)]
pub(crate) struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// Blocks until `delay` has passed since the previous call.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready_at = last + self.delay;
            let now = Instant::now();
            if ready_at > now {
                thread::sleep(ready_at - now);
            }
        }
        self.last = Some(Instant::now());
    }
}
