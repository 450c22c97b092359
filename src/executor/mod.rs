//! Step Executor — DAG engine (C5, spec.md §4.5). Walks a validated plan's
//! dependency graph, launching ready steps under a bounded worker pool,
//! retrying transient failures with backoff, and cascading `skipped` status
//! to steps downstream of a permanent failure.

mod cancellation;
mod pause;

pub use cancellation::CancellationToken;
pub use pause::PauseToken;

use crate::config::RetryPolicy;
use crate::domain::{Plan, PlanStatus, Step, StepResult, StepStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Executes one step. Implementations typically delegate to
/// `crate::agents::AgentRegistry::select_for` and call the winning agent;
/// kept as a trait so the executor's scheduling logic can be tested against
/// a fake that never touches the network.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &Step, cancellation: &CancellationToken) -> Result<StepResult>;
}

/// Persistence hook invoked after every state transition (spec.md §4.5
/// "Persistence hook"). The executor fires this without waiting for
/// acknowledgement — the store may run asynchronously.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn save_state(&self, plan: &Plan);
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct PlanResult {
    pub plan_id: uuid::Uuid,
    pub status: PlanStatus,
    pub completed_steps: u32,
    pub failed_steps: Vec<String>,
}

/// Per-request DAG executor. Holds no state across requests; the pipeline
/// factory (C6) constructs a fresh one per request (spec.md §3
/// "Lifecycle/Ownership").
pub struct StepExecutor {
    worker_pool_size: usize,
    retry: RetryPolicy,
    grace_period_ms: u64,
}

impl StepExecutor {
    pub fn new(worker_pool_size: usize, retry: RetryPolicy, grace_period_ms: u64) -> Self {
        Self {
            worker_pool_size: worker_pool_size.max(1),
            retry,
            grace_period_ms,
        }
    }

    /// `execute(plan, step_executors, cancellation_token) -> PlanResult`
    /// (spec.md §4.5). Validates the plan's dependency graph once at entry,
    /// then loops: collect ready steps, launch parallel-group members
    /// concurrently and ungrouped members sequentially, wait for
    /// completions, update status, repeat.
    pub async fn execute(
        &self,
        plan: Plan,
        runner: Arc<dyn StepRunner>,
        sink: Option<Arc<dyn StateSink>>,
        cancellation: CancellationToken,
    ) -> Result<PlanResult> {
        self.execute_with_pause(plan, runner, sink, cancellation, PauseToken::new())
            .await
    }

    /// Same as [`Self::execute`] but also honours a [`PauseToken`]
    /// (spec.md §4.5 "Pause/Resume"): while paused, no new ready steps are
    /// launched but steps already running are allowed to finish; the plan's
    /// status is surfaced as `Paused` for the duration.
    pub async fn execute_with_pause(
        &self,
        mut plan: Plan,
        runner: Arc<dyn StepRunner>,
        sink: Option<Arc<dyn StateSink>>,
        cancellation: CancellationToken,
        pause: PauseToken,
    ) -> Result<PlanResult> {
        plan.validate()?;
        plan.status = PlanStatus::Running;
        let plan = Arc::new(Mutex::new(plan));
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));

        loop {
            if cancellation.is_cancelled() {
                let mut guard = plan.lock().await;
                guard.status = PlanStatus::Cancelled;
                for step in &mut guard.steps {
                    if !step.status.is_terminal() {
                        step.status = StepStatus::Failed;
                        step.error = Some("cancelled".to_string());
                    }
                }
                self.persist(&guard, &sink).await;
                return Ok(Self::result_from(&guard));
            }

            if pause.is_paused() {
                {
                    let mut guard = plan.lock().await;
                    if guard.status != PlanStatus::Paused {
                        guard.status = PlanStatus::Paused;
                        self.persist(&guard, &sink).await;
                    }
                }
                pause.resumed().await;
                let mut guard = plan.lock().await;
                if guard.status == PlanStatus::Paused {
                    guard.status = PlanStatus::Running;
                }
                continue;
            }

            let (ready_groups, ready_sequential) = {
                let guard = plan.lock().await;
                if !Self::has_non_terminal(&guard) {
                    break;
                }
                Self::partition_ready(&guard)
            };

            if ready_groups.is_empty() && ready_sequential.is_empty() {
                // Nothing launchable right now but work remains outstanding
                // (e.g. a parallel group mid-flight); yield briefly.
                tokio::task::yield_now().await;
                continue;
            }

            let mut join_set: JoinSet<(String, Result<StepResult>)> = JoinSet::new();

            for group_steps in ready_groups {
                for step_id in group_steps {
                    self.mark_running(&plan, &step_id).await;
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let runner = runner.clone();
                    let plan = plan.clone();
                    let cancellation = cancellation.clone();
                    join_set.spawn(async move {
                        let step = {
                            let guard = plan.lock().await;
                            guard.step(&step_id).cloned().expect("step exists")
                        };
                        let result = runner.run(&step, &cancellation).await;
                        drop(permit);
                        (step_id, result)
                    });
                }
            }

            for step_id in ready_sequential {
                self.mark_running(&plan, &step_id).await;
                let step = {
                    let guard = plan.lock().await;
                    guard.step(&step_id).cloned().expect("step exists")
                };
                let result = runner.run(&step, &cancellation).await;
                self.apply_result(&plan, &step_id, result, &sink).await;
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((step_id, result)) => self.apply_result(&plan, &step_id, result, &sink).await,
                    Err(join_err) => warn!(error = %join_err, "step task panicked"),
                }
            }
        }

        let mut guard = plan.lock().await;
        let all_completed = guard.steps.iter().all(|s| s.status == StepStatus::Completed);
        guard.status = if all_completed {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        self.persist(&guard, &sink).await;
        Ok(Self::result_from(&guard))
    }

    fn has_non_terminal(plan: &Plan) -> bool {
        plan.steps.iter().any(|s| !s.status.is_terminal())
    }

    /// Splits ready steps into parallel groups (keyed by `parallel_group`)
    /// and an ungrouped sequential list (spec.md §4.5 step 2).
    fn partition_ready(plan: &Plan) -> (Vec<Vec<String>>, Vec<String>) {
        let completed: HashSet<String> = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.step_id.clone())
            .collect();

        let mut groups: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
        let mut sequential = Vec::new();

        for step in &plan.steps {
            if !step.is_ready(&completed) {
                continue;
            }
            match &step.parallel_group {
                Some(group) => groups.entry(group.clone()).or_default().push(step.step_id.clone()),
                None => sequential.push(step.step_id.clone()),
            }
        }

        (groups.into_values().collect(), sequential)
    }

    async fn mark_running(&self, plan: &Arc<Mutex<Plan>>, step_id: &str) {
        let mut guard = plan.lock().await;
        if let Some(step) = guard.step_mut(step_id) {
            step.status = StepStatus::Running;
            step.started_at = Some(chrono::Utc::now());
        }
    }

    async fn apply_result(
        &self,
        plan: &Arc<Mutex<Plan>>,
        step_id: &str,
        result: Result<StepResult>,
        sink: &Option<Arc<dyn StateSink>>,
    ) {
        let mut guard = plan.lock().await;
        match result {
            Ok(step_result) => {
                if let Some(step) = guard.step_mut(step_id) {
                    step.status = StepStatus::Completed;
                    step.completed_at = Some(chrono::Utc::now());
                    step.confidence = Some(step_result.confidence);
                    step.quality_score = Some(step_result.quality);
                    step.result = Some(step_result.result_data.clone());
                }
                info!(step_id, "step completed");
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let (attempt, max_attempts) = {
                    let step = guard.step(step_id).expect("step exists");
                    (step.attempt, self.retry.max_attempts)
                };
                if retryable && attempt + 1 < max_attempts {
                    let backoff = self.retry.backoff_ms(attempt + 1);
                    if let Some(step) = guard.step_mut(step_id) {
                        step.attempt += 1;
                        step.status = StepStatus::Pending;
                        step.error = Some(err.to_string());
                    }
                    self.persist(&guard, sink).await;
                    drop(guard);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    return;
                }
                if let Some(step) = guard.step_mut(step_id) {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(chrono::Utc::now());
                    step.error = Some(err.to_string());
                }
                warn!(step_id, error = %err, "step failed permanently");
                Self::cascade_skip(&mut guard, step_id);
            }
        }
        self.persist(&guard, sink).await;
    }

    /// Marks every step transitively depending on `failed_step_id` as
    /// `skipped`, unless it is already terminal (spec.md §4.5 "downstream
    /// dependent steps are marked skipped").
    fn cascade_skip(plan: &mut Plan, failed_step_id: &str) {
        let mut frontier = vec![failed_step_id.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(failed_step_id.to_string());

        while let Some(current) = frontier.pop() {
            let dependents: Vec<String> = plan
                .steps
                .iter()
                .filter(|s| s.dependencies.iter().any(|d| d == &current))
                .map(|s| s.step_id.clone())
                .collect();

            for dependent_id in dependents {
                if visited.contains(&dependent_id) {
                    continue;
                }
                visited.insert(dependent_id.clone());
                if let Some(step) = plan.step_mut(&dependent_id) {
                    if !step.status.is_terminal() {
                        step.status = StepStatus::Skipped;
                        step.error = Some(format!("skipped: upstream step {failed_step_id} failed"));
                    }
                }
                frontier.push(dependent_id);
            }
        }
    }

    async fn persist(&self, plan: &Plan, sink: &Option<Arc<dyn StateSink>>) {
        if let Some(sink) = sink {
            sink.save_state(plan).await;
        }
    }

    fn result_from(plan: &Plan) -> PlanResult {
        let failed_steps = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.step_id.clone())
            .collect();
        let status = if plan.status == PlanStatus::Cancelled {
            PlanStatus::Cancelled
        } else if plan.steps.iter().all(|s| s.status == StepStatus::Completed) {
            PlanStatus::Completed
        } else if plan.steps.iter().any(|s| s.status == StepStatus::Failed) {
            PlanStatus::Failed
        } else {
            plan.status
        };
        PlanResult {
            plan_id: plan.plan_id,
            status,
            completed_steps: plan.completed_steps(),
            failed_steps,
        }
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("worker_pool_size", &self.worker_pool_size)
            .field("grace_period_ms", &self.grace_period_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SecurityLevel, StepType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct AlwaysSucceeds {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StepRunner for AlwaysSucceeds {
        async fn run(&self, step: &Step, _cancellation: &CancellationToken) -> Result<StepResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepResult {
                plan_id: step.plan_id,
                step_id: step.step_id.clone(),
                result_data: serde_json::json!({"ok": true}),
                confidence: 0.9,
                quality: 0.9,
                sources: Vec::new(),
                recorded_at: chrono::Utc::now(),
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StepRunner for AlwaysFails {
        async fn run(&self, _step: &Step, _cancellation: &CancellationToken) -> Result<StepResult> {
            Err(Error::data_integrity("permanent failure"))
        }
    }

    fn plan_with_chain() -> Plan {
        let plan_id = Uuid::new_v4();
        let s1 = Step::new(plan_id, 0, "s1", "s1", StepType::Retrieval);
        let s2 = Step::new(plan_id, 1, "s2", "s2", StepType::Analysis).with_dependencies(vec!["s1".to_string()]);
        let s3 = Step::new(plan_id, 2, "s3", "s3", StepType::Synthesis).with_dependencies(vec!["s2".to_string()]);
        Plan::new("q", SecurityLevel::Public).with_steps(vec![s1, s2, s3])
    }

    #[tokio::test]
    async fn runs_a_linear_chain_to_completion() {
        let executor = StepExecutor::new(5, RetryPolicy::default(), 2000);
        let runner = Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) });
        let result = executor
            .execute(plan_with_chain(), runner.clone(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(result.completed_steps, 3);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_cascades_to_dependents() {
        let plan_id = Uuid::new_v4();
        let s1 = Step::new(plan_id, 0, "s1", "s1", StepType::Retrieval);
        let s2 = Step::new(plan_id, 1, "s2", "s2", StepType::Analysis).with_dependencies(vec!["s1".to_string()]);
        let plan = Plan::new("q", SecurityLevel::Public).with_steps(vec![s1, s2]);

        let retry = RetryPolicy { max_attempts: 1, backoff_base_ms: 1, backoff_factor: 1.0 };
        let executor = StepExecutor::new(5, retry, 2000);
        let result = executor
            .execute(plan, Arc::new(AlwaysFails), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.failed_steps, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn rejects_cyclic_plan_before_running_anything() {
        let plan_id = Uuid::new_v4();
        let s1 = Step::new(plan_id, 0, "s1", "s1", StepType::Retrieval).with_dependencies(vec!["s2".to_string()]);
        let s2 = Step::new(plan_id, 1, "s2", "s2", StepType::Retrieval).with_dependencies(vec!["s1".to_string()]);
        let plan = Plan::new("q", SecurityLevel::Public).with_steps(vec![s1, s2]);

        let executor = StepExecutor::new(5, RetryPolicy::default(), 2000);
        let runner = Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) });
        let result = executor.execute(plan, runner, None, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pause_blocks_new_steps_until_resumed() {
        let pause = PauseToken::new();
        pause.pause();
        let runner = Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) });
        let handle = {
            let executor = StepExecutor::new(5, RetryPolicy::default(), 2000);
            let runner = runner.clone();
            let pause = pause.clone();
            tokio::spawn(async move {
                executor
                    .execute_with_pause(
                        plan_with_chain(),
                        runner,
                        None,
                        CancellationToken::new(),
                        pause,
                    )
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        pause.resume();
        let result = handle.await.unwrap();
        assert_eq!(result.status, PlanStatus::Completed);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_marks_plan_cancelled() {
        let executor = StepExecutor::new(5, RetryPolicy::default(), 2000);
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let runner = Arc::new(AlwaysSucceeds { calls: AtomicUsize::new(0) });
        let result = executor.execute(plan_with_chain(), runner, None, cancellation).await.unwrap();
        assert_eq!(result.status, PlanStatus::Cancelled);
    }
}
