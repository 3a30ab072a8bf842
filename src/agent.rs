//! Registered agents and what the health monitor learned about them.

use std::{fmt::Debug, hash::Hash, sync::Arc};

use serde::Serialize;

use crate::game_interface::{AgentEndpoint, AgentInfo};

/// Result of the pre-tournament health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum HealthStatus {
    /// Not probed yet.
    Unknown,
    /// Answered and ready.
    Healthy,
    /// Excluded from the tournament.
    Unhealthy(String),
}

/// A registered participant.
///
/// Everything but `health` and `info` comes from the configuration and never changes;
/// those two are set once by the health monitor before scheduling.
pub struct Agent {
    /// Unique id (`ai_id`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Base URL of the agent service.
    pub url: String,
    /// Free text from the configuration.
    pub description: Option<String>,
    /// Set by the health monitor.
    pub health: HealthStatus,
    /// Capability description returned by the agent, if any.
    pub info: Option<AgentInfo>,
    pub(crate) endpoint: Arc<dyn AgentEndpoint>,
}

impl Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Agent {
    /// Registers an agent reachable through `endpoint`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        description: Option<String>,
        endpoint: Arc<dyn AgentEndpoint>,
    ) -> Agent {
        Agent {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            description,
            health: HealthStatus::Unknown,
            info: None,
            endpoint,
        }
    }

    /// True once the health monitor accepted the agent.
    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }

    pub(crate) fn endpoint(&self) -> &Arc<dyn AgentEndpoint> {
        &self.endpoint
    }

    /// Public part of the agent, as exported with the tournament state.
    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            health: self.health.clone(),
        }
    }
}

/// Serializable view of an [`Agent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub health: HealthStatus,
}
