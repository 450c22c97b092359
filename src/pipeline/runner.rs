//! Adapters bridging the step executor (C5) to the agent registry (C4) and
//! state store (C10): a `StepRunner` that routes a step to the
//! highest-ranked eligible agent, and a `StateSink` that persists every
//! transition without blocking the executor on acknowledgement (spec.md
//! §4.5 "Persistence hook").

use crate::agents::{AgentContext, AgentRegistry};
use crate::domain::{Plan, Step, StepResult};
use crate::error::{Error, Result};
use crate::executor::{CancellationToken, StateSink, StepRunner};
use crate::store::{ConsistencyHint, StateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Routes each step to `AgentRegistry::select_for`'s top candidate and
/// records every produced `StepResult` (and which agent produced it) for
/// the pipeline to turn into synthesiser findings afterwards.
pub struct AgentStepRunner {
    registry: Arc<AgentRegistry>,
    context: AgentContext,
    budget_hint: u32,
    results: Mutex<Vec<(String, StepResult)>>,
}

impl AgentStepRunner {
    pub fn new(registry: Arc<AgentRegistry>, context: AgentContext, budget_hint: u32) -> Self {
        Self {
            registry,
            context,
            budget_hint,
            results: Mutex::new(Vec::new()),
        }
    }

    /// `(agent_id, result)` pairs in completion order, for building
    /// agent-result blocks and appending `step_results`.
    pub async fn results(&self) -> Vec<(String, StepResult)> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl StepRunner for AgentStepRunner {
    async fn run(&self, step: &Step, _cancellation: &CancellationToken) -> Result<StepResult> {
        let agent = self
            .registry
            .select_for(step, &self.context.detected_domains)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::resource_unavailable(
                    "agent_registry",
                    format!("no eligible agent for step {}", step.step_id),
                )
            })?;
        let agent_id = agent.handle().id;
        let result = agent.execute(step, &self.context, self.budget_hint).await?;
        self.results.lock().await.push((agent_id, result.clone()));
        Ok(result)
    }
}

/// Persists every state transition the executor hands it and keeps the
/// latest plan snapshot around, since `StepExecutor::execute` only returns
/// a `PlanResult` summary (spec.md §4.5 "the engine does not assume the
/// store acknowledged").
pub struct PersistingSink {
    store: Arc<dyn StateStore>,
    consistency: ConsistencyHint,
    last_plan: Mutex<Option<Plan>>,
}

impl PersistingSink {
    pub fn new(store: Arc<dyn StateStore>, consistency: ConsistencyHint) -> Self {
        Self {
            store,
            consistency,
            last_plan: Mutex::new(None),
        }
    }

    pub async fn last_plan(&self) -> Option<Plan> {
        self.last_plan.lock().await.clone()
    }
}

#[async_trait]
impl StateSink for PersistingSink {
    async fn save_state(&self, plan: &Plan) {
        if let Err(err) = self.store.update_plan(plan, self.consistency).await {
            warn!(error = %err, plan_id = %plan.plan_id, "failed to persist plan state");
        }
        *self.last_plan.lock().await = Some(plan.clone());
    }
}
