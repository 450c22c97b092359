//! Agent contract and registry records (spec.md §4.4).

use crate::domain::{Step, StepResult};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A capability an agent declares and a step requires, e.g.
/// `"legal.statute_lookup"`. Free-form but namespaced by convention.
pub type Capability = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
}

impl AgentHealth {
    pub fn is_eligible(self) -> bool {
        matches!(self, AgentHealth::Healthy | AgentHealth::Degraded)
    }
}

/// Everything the registry and router need to know about one agent without
/// calling it: `{id, domain, capabilities, health}` (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHandle {
    pub id: String,
    pub domain: String,
    pub capabilities: HashSet<Capability>,
    pub health: AgentHealth,
    /// Rolling success rate in `[0, 1]`, updated by the executor after each
    /// completed step.
    pub rolling_success_rate: f64,
    /// P95 latency observed over the rolling window, milliseconds.
    pub p95_latency_ms: u64,
}

impl AgentHandle {
    pub fn new(id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            capabilities: HashSet::new(),
            health: AgentHealth::Healthy,
            rolling_success_rate: 1.0,
            p95_latency_ms: 0,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_health(mut self, health: AgentHealth) -> Self {
        self.health = health;
        self
    }
}

/// Runtime execution context handed to an agent: whatever it needs besides
/// the query text and budget hint, without exposing the full plan.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub detected_domains: Vec<String>,
    pub language: String,
}

/// `execute(query, context, budget_hint) -> StepResult` (spec.md §4.4).
/// Agents must be idempotent with respect to their own state and must not
/// share mutable state with peers; they reach the retriever and LLM only
/// through clients injected at construction, never a global.
#[async_trait]
pub trait Agent: Send + Sync {
    fn handle(&self) -> AgentHandle;

    async fn execute(&self, step: &Step, context: &AgentContext, budget_hint: u32) -> Result<StepResult>;
}
