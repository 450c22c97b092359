//! Agent registry and router (spec.md §4.4), grounded on the teacher's
//! `SmartRouter`/`QueryType::classify`/`RoutingContext` stack: candidates are
//! scored by a tuple of factors rather than the first capability match, and
//! reads take a cloned snapshot so routing never blocks on registration
//! updates (spec.md §5 "reads use a snapshot").

use super::types::{Agent, AgentHandle};
use crate::domain::Step;
use std::sync::{Arc, RwLock};

/// Scoring weights used to break capability-match ties; higher is better on
/// every factor. Exposed as a struct, not a magic tuple comparison, so the
/// ranking is easy to reason about and to unit test in isolation.
#[derive(Debug, Clone, Copy)]
struct Score {
    capability_match: usize,
    domain_proximity: u8,
    rolling_success_rate: f64,
    /// Lower latency is better; stored negated so `Score` can still compare
    /// "higher is better" uniformly.
    negative_p95_latency_ms: i64,
}

impl Score {
    /// Total order over `Score`, highest-first: compares each factor in
    /// priority order, falling back to the next on a tie. `f64` fields never
    /// carry NaN here (success rates and latencies are always finite), so
    /// `partial_cmp` is safe to unwrap.
    fn cmp_desc(&self, other: &Score) -> std::cmp::Ordering {
        self.capability_match
            .cmp(&other.capability_match)
            .then(self.domain_proximity.cmp(&other.domain_proximity))
            .then(
                self.rolling_success_rate
                    .partial_cmp(&other.rolling_success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(self.negative_p95_latency_ms.cmp(&other.negative_p95_latency_ms))
    }

    fn equals(&self, other: &Score) -> bool {
        self.cmp_desc(other) == std::cmp::Ordering::Equal
    }
}

/// Process-wide registry of agent handles and their executable instances
/// (spec.md §3 "Lifecycle/Ownership" — shared across requests; never owned
/// by a single pipeline).
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn Agent>>>,
    /// Round-robin cursor for final tiebreaks, advanced on every
    /// `select_for` call.
    round_robin_cursor: std::sync::atomic::AtomicUsize,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            round_robin_cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn register(&self, agent: Arc<dyn Agent>) {
        let mut agents = self.agents.write().expect("agent registry lock poisoned");
        agents.push(agent);
    }

    /// Removes every agent with the given id (spec.md §5 "Agent registry:
    /// mutable (agents may be registered/deregistered) under a mutex").
    pub fn deregister(&self, agent_id: &str) {
        let mut agents = self.agents.write().expect("agent registry lock poisoned");
        agents.retain(|agent| agent.handle().id != agent_id);
    }

    /// Capability introspection (spec.md §6 "available agents
    /// (domain/capability)"): a snapshot of every registered agent's
    /// handle, independent of routing eligibility.
    pub fn handles(&self) -> Vec<AgentHandle> {
        self.snapshot().iter().map(|agent| agent.handle()).collect()
    }

    /// A cloned snapshot of the current agent list, so callers never hold
    /// the registry lock while scoring or executing.
    fn snapshot(&self) -> Vec<Arc<dyn Agent>> {
        self.agents.read().expect("agent registry lock poisoned").clone()
    }

    /// `select_for(step) -> [AgentHandle]` (spec.md §4.4): candidates whose
    /// capabilities satisfy `step.agent_capability_req`, ranked by
    /// `(capability_match, domain_proximity, rolling_success_rate,
    /// p95_latency, round_robin_tiebreak)`. Disabled/unhealthy agents are
    /// excluded before scoring.
    pub fn select_for(&self, step: &Step, detected_domains: &[String]) -> Vec<Arc<dyn Agent>> {
        let required: std::collections::HashSet<&str> =
            step.agent_capability_req.iter().map(|c| c.as_str()).collect();

        let mut candidates: Vec<(Arc<dyn Agent>, AgentHandle, Score)> = self
            .snapshot()
            .into_iter()
            .filter_map(|agent| {
                let handle = agent.handle();
                if !handle.health.is_eligible() {
                    return None;
                }
                let capability_match = required
                    .iter()
                    .filter(|req| handle.capabilities.contains(**req))
                    .count();
                if required.is_empty() {
                    // A step with no declared requirement accepts any agent;
                    // still score it so domain proximity/health order it.
                } else if capability_match == 0 {
                    return None;
                }
                let domain_proximity = if detected_domains.iter().any(|d| d == &handle.domain) {
                    1
                } else {
                    0
                };
                let score = Score {
                    capability_match,
                    domain_proximity,
                    rolling_success_rate: handle.rolling_success_rate,
                    negative_p95_latency_ms: -(handle.p95_latency_ms as i64),
                };
                Some((agent, handle, score))
            })
            .collect();

        candidates.sort_by(|a, b| b.2.cmp_desc(&a.2));

        if candidates.len() > 1 {
            // Round-robin tiebreak among agents sharing the top score.
            let top_score = candidates[0].2;
            let tie_count = candidates.iter().take_while(|c| c.2.equals(&top_score)).count();
            if tie_count > 1 {
                let cursor = self
                    .round_robin_cursor
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                    % tie_count;
                candidates.swap(0, cursor);
            }
        }

        candidates.into_iter().map(|(agent, _, _)| agent).collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{AgentContext, AgentHealth};
    use crate::domain::{Step, StepResult, StepType};
    use crate::error::Result;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FakeAgent {
        handle: AgentHandle,
    }

    #[async_trait]
    impl Agent for FakeAgent {
        fn handle(&self) -> AgentHandle {
            self.handle.clone()
        }

        async fn execute(&self, step: &Step, _context: &AgentContext, _budget_hint: u32) -> Result<StepResult> {
            Ok(StepResult {
                plan_id: step.plan_id,
                step_id: step.step_id.clone(),
                result_data: serde_json::json!({}),
                confidence: 0.9,
                quality: 0.9,
                sources: Vec::new(),
                recorded_at: chrono::Utc::now(),
            })
        }
    }

    fn step_requiring(caps: &[&str]) -> Step {
        Step::new(Uuid::new_v4(), 0, "s1", "s1", StepType::Analysis)
            .with_capabilities(caps.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn excludes_agents_missing_required_capability() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a1", "environmental"),
        }));
        let step = step_requiring(&["legal.statute_lookup"]);
        assert!(registry.select_for(&step, &[]).is_empty());
    }

    #[test]
    fn excludes_disabled_agents() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a1", "legal")
                .with_capability("legal.statute_lookup")
                .with_health(AgentHealth::Disabled),
        }));
        let step = step_requiring(&["legal.statute_lookup"]);
        assert!(registry.select_for(&step, &[]).is_empty());
    }

    #[test]
    fn prefers_agent_with_matching_domain() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a1", "environmental").with_capability("legal.statute_lookup"),
        }));
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a2", "legal").with_capability("legal.statute_lookup"),
        }));
        let step = step_requiring(&["legal.statute_lookup"]);
        let ranked = registry.select_for(&step, &["legal".to_string()]);
        assert_eq!(ranked[0].handle().id, "a2");
    }

    #[test]
    fn step_with_no_requirement_accepts_any_healthy_agent() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a1", "legal"),
        }));
        let step = step_requiring(&[]);
        assert_eq!(registry.select_for(&step, &[]).len(), 1);
    }

    #[test]
    fn deregister_removes_agent_from_snapshot_and_routing() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FakeAgent {
            handle: AgentHandle::new("a1", "legal").with_capability("legal.statute_lookup"),
        }));
        assert_eq!(registry.handles().len(), 1);
        registry.deregister("a1");
        assert!(registry.handles().is_empty());
        let step = step_requiring(&["legal.statute_lookup"]);
        assert!(registry.select_for(&step, &[]).is_empty());
    }
}
