//! Resilient state store (spec.md §4.10 "a primary ... with a file-based
//! fallback if the primary is unreachable; clients never know which
//! backend served them"). Wraps any `StateStore` primary with the
//! `FallbackStore`; reads always go to the primary, writes fall back on a
//! `BestEffort` hint and fail loudly on `MustPersist`.

use super::fallback::FallbackStore;
use super::{ConsistencyHint, PlanFilters, StateStore};
use crate::domain::{ExecutionLogEntry, Plan, Step, StepResult};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct ResilientStateStore<P: StateStore> {
    primary: Arc<P>,
    fallback: Arc<FallbackStore>,
}

impl<P: StateStore> ResilientStateStore<P> {
    pub fn new(primary: Arc<P>, fallback: Arc<FallbackStore>) -> Self {
        Self { primary, fallback }
    }

    /// Replays everything accumulated in the fallback back into the
    /// primary, e.g. on pipeline-factory startup once the primary is known
    /// to be healthy again.
    pub async fn reconcile(&self) -> Result<super::fallback::ReplayReport> {
        self.fallback.replay_into(self.primary.as_ref()).await
    }
}

#[async_trait]
impl<P: StateStore> StateStore for ResilientStateStore<P> {
    async fn create_plan(&self, plan: &Plan, hint: ConsistencyHint) -> Result<()> {
        match self.primary.create_plan(plan, hint).await {
            Ok(()) => Ok(()),
            Err(err) if hint == ConsistencyHint::BestEffort => {
                self.fallback.append_plan(plan)?;
                warn!(error = %err, plan_id = %plan.plan_id, "plan write degraded to fallback store");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        self.primary.get_plan(plan_id).await
    }

    async fn update_plan(&self, plan: &Plan, hint: ConsistencyHint) -> Result<()> {
        match self.primary.update_plan(plan, hint).await {
            Ok(()) => Ok(()),
            Err(err) if hint == ConsistencyHint::BestEffort => {
                self.fallback.append_plan(plan)?;
                warn!(error = %err, plan_id = %plan.plan_id, "plan update degraded to fallback store");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list_plans(&self, filters: &PlanFilters) -> Result<Vec<Plan>> {
        self.primary.list_plans(filters).await
    }

    async fn create_step(&self, step: &Step, hint: ConsistencyHint) -> Result<()> {
        match self.primary.create_step(step, hint).await {
            Ok(()) => Ok(()),
            Err(err) if hint == ConsistencyHint::BestEffort => {
                self.fallback.append_step(step)?;
                warn!(error = %err, step_id = %step.step_id, "step write degraded to fallback store");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn update_step(&self, step: &Step, hint: ConsistencyHint) -> Result<()> {
        match self.primary.update_step(step, hint).await {
            Ok(()) => Ok(()),
            Err(err) if hint == ConsistencyHint::BestEffort => {
                self.fallback.append_step(step)?;
                warn!(error = %err, step_id = %step.step_id, "step update degraded to fallback store");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn append_step_result(&self, result: &StepResult) -> Result<()> {
        match self.primary.append_step_result(result).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fallback.append_step_result(result)?;
                warn!(error = %err, step_id = %result.step_id, "step result degraded to fallback store");
                Ok(())
            }
        }
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        match self.primary.append_log(entry).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fallback.append_log(entry)?;
                warn!(error = %err, plan_id = %entry.plan_id, "log entry degraded to fallback store");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SecurityLevel, Step, StepType};
    use crate::store::SqliteStateStore;
    use tempfile::tempdir;

    fn sample_plan() -> Plan {
        let plan_id = Uuid::new_v4();
        let step = Step::new(plan_id, 0, "s1", "find sources", StepType::Retrieval);
        Plan::new("q", SecurityLevel::Public).with_steps(vec![step])
    }

    #[tokio::test]
    async fn best_effort_write_degrades_to_fallback_when_primary_down() {
        let dir = tempdir().unwrap();
        let primary = Arc::new(SqliteStateStore::in_memory().unwrap());
        primary.disable();
        let fallback = Arc::new(FallbackStore::new(dir.path()).unwrap());
        let store = ResilientStateStore::new(primary.clone(), fallback.clone());

        let plan = sample_plan();
        store
            .create_plan(&plan, ConsistencyHint::BestEffort)
            .await
            .expect("best-effort write should not fail even though primary is down");

        primary.enable();
        let report = store.reconcile().await.unwrap();
        assert_eq!(report.plans_replayed, 1);
        assert!(store.get_plan(plan.plan_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn must_persist_write_fails_loudly_when_primary_down() {
        let dir = tempdir().unwrap();
        let primary = Arc::new(SqliteStateStore::in_memory().unwrap());
        primary.disable();
        let fallback = Arc::new(FallbackStore::new(dir.path()).unwrap());
        let store = ResilientStateStore::new(primary, fallback);

        let result = store
            .create_plan(&sample_plan(), ConsistencyHint::MustPersist)
            .await;
        assert!(result.is_err());
    }
}
