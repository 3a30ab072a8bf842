//! Pre-tournament availability checks.
//!
//! Agents are probed once, before scheduling. An agent that degrades later only shows up as
//! transport errors in its own sessions.

use std::{sync::Arc, thread, time::Duration};

use tracing::{info, instrument, warn};

use crate::agent::{Agent, HealthStatus};
use crate::error::ArenaError;
use crate::game_interface::GameServer;

/// Outcome of the health checks.
#[derive(Debug)]
pub struct HealthReport {
    /// Every registered agent, with its health status set.
    pub agents: Vec<Arc<Agent>>,
    /// Why the game server was found unusable, if it was.
    pub game_server_failure: Option<String>,
}

impl HealthReport {
    /// Agents allowed to play, in registration order.
    pub fn healthy(&self) -> Vec<Arc<Agent>> {
        self.agents
            .iter()
            .filter(|a| a.is_healthy())
            .cloned()
            .collect()
    }

    /// Agents left out, with the reason.
    pub fn excluded(&self) -> Vec<ArenaError> {
        self.agents
            .iter()
            .filter_map(|a| match &a.health {
                HealthStatus::Unhealthy(reason) => Some(ArenaError::HealthCheckFailure {
                    agent: a.id.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Probes agents and the game server with a short timeout.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    timeout: Duration,
}

impl HealthMonitor {
    /// `timeout` bounds every single probe.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Checks the game server and every agent; agents are probed concurrently.
    #[instrument(skip_all)]
    pub fn check(&self, game_server: &dyn GameServer, agents: Vec<Agent>) -> HealthReport {
        let game_server_failure = match game_server.health(self.timeout) {
            Ok(()) => {
                info!("game server {} is healthy", game_server.address());
                None
            }
            Err(e) => {
                warn!("game server {} failed its health check: {e:#}", game_server.address());
                Some(format!("{e:#}"))
            }
        };

        let timeout = self.timeout;
        let agents = thread::scope(|scope| {
            let handles = agents
                .into_iter()
                .map(|agent| scope.spawn(move || probe_agent(agent, timeout)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(agent) => agent,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .map(Arc::new)
                .collect::<Vec<_>>()
        });

        HealthReport {
            agents,
            game_server_failure,
        }
    }
}

fn probe_agent(mut agent: Agent, timeout: Duration) -> Agent {
    agent.health = match agent.endpoint.health(timeout) {
        Ok(health) if health.is_ready() => HealthStatus::Healthy,
        Ok(health) => HealthStatus::Unhealthy(format!("not ready (status '{}')", health.status)),
        Err(e) => HealthStatus::Unhealthy(format!("{e:#}")),
    };

    match &agent.health {
        HealthStatus::Healthy => {
            info!("✓ {} ({}) is healthy", agent.name, agent.id);
            match agent.endpoint.info(timeout) {
                Ok(info) => agent.info = Some(info),
                Err(e) => warn!("could not read info of {}: {e:#}", agent.id),
            }
        }
        HealthStatus::Unhealthy(reason) => {
            warn!("✗ {} ({}) excluded: {reason}", agent.name, agent.id);
        }
        HealthStatus::Unknown => unreachable!("health was just set"),
    }
    agent
}
