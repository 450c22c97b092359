//! Research Plan / Step records (spec.md §3 "Research Plan / Step").
//!
//! These are the records the step executor (C5) mutates in memory and the
//! state store (C10) persists. A `Plan` flows through exactly one
//! request-scoped pipeline instance; see `crate::pipeline` for lifecycle.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Public,
    Internal,
    Confidential,
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Search,
    Retrieval,
    Analysis,
    Synthesis,
    Comparison,
    Calculation,
    Validation,
    Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Atomic unit of work within a research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub plan_id: Uuid,
    pub index: u32,
    pub name: String,
    pub step_type: StepType,
    pub agent_capability_req: Vec<String>,
    pub status: StepStatus,
    pub dependencies: Vec<String>,
    pub parallel_group: Option<String>,
    /// Fingerprint of the inputs this step ran against, used to detect
    /// whether a retried step can reuse a cached result.
    pub input_ref: String,
    pub result: Option<serde_json::Value>,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_ms: Option<u64>,
    /// Current retry attempt count, needed by the exponential-backoff retry
    /// policy (spec.md §4.5/§6).
    pub attempt: u32,
}

impl Step {
    pub fn new(
        plan_id: Uuid,
        index: u32,
        step_id: impl Into<String>,
        name: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            plan_id,
            index,
            name: name.into(),
            step_type,
            agent_capability_req: Vec::new(),
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            parallel_group: None,
            input_ref: String::new(),
            result: None,
            confidence: None,
            quality_score: None,
            error: None,
            started_at: None,
            completed_at: None,
            execution_ms: None,
            attempt: 0,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    pub fn with_capabilities(mut self, caps: Vec<String>) -> Self {
        self.agent_capability_req = caps;
        self
    }

    /// Derives `input_ref` from everything that determines what this step
    /// will actually do: its type, name, required capabilities, dependency
    /// ids, and the research question it runs against. Two runs of the same
    /// step over the same inputs get the same `input_ref`, so a retry can
    /// tell whether a cached result is still reusable (spec.md §3).
    pub fn with_input_ref(mut self, research_question: &str) -> Self {
        self.input_ref = self.fingerprint_inputs(research_question);
        self
    }

    fn fingerprint_inputs(&self, research_question: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.step_type).as_bytes());
        hasher.update(b"\0");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        for cap in &self.agent_capability_req {
            hasher.update(cap.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0");
        for dep in &self.dependencies {
            hasher.update(dep.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0");
        hasher.update(research_question.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether a previously recorded result for this step can be reused
    /// instead of re-running it, i.e. the inputs it would run against now
    /// match the inputs it last ran against (spec.md §3 "input_ref").
    pub fn can_reuse_cached_result(&self, previous: &Step) -> bool {
        !self.input_ref.is_empty()
            && self.input_ref == previous.input_ref
            && previous.status == StepStatus::Completed
            && previous.result.is_some()
    }

    /// `ready(S) = every dependency of S is completed` (spec.md §4.5).
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == StepStatus::Pending
            && self.dependencies.iter().all(|d| completed.contains(d))
    }
}

/// Append-only result record for a step (spec.md §3 "step_result"). Plans
/// keep only the latest result on `Step::result`; the state store keeps the
/// full append-only history via `append_step_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub plan_id: Uuid,
    pub step_id: String,
    pub result_data: serde_json::Value,
    pub confidence: f64,
    pub quality: f64,
    pub sources: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub plan_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub agent_id: Option<String>,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

/// The full step graph and metadata persisted for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub research_question: String,
    pub status: PlanStatus,
    pub uds3_databases: Vec<String>,
    pub security_level: SecurityLevel,
    pub total_steps: u32,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(research_question: impl Into<String>, security_level: SecurityLevel) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            research_question: research_question.into(),
            status: PlanStatus::Pending,
            uds3_databases: Vec::new(),
            security_level,
            total_steps: 0,
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.total_steps = steps.len() as u32;
        self.steps = steps;
        self
    }

    pub fn completed_steps(&self) -> u32 {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count() as u32
    }

    /// `progress_percentage = completed_steps / total_steps * 100` rounded to
    /// 0.01, per spec.md §3 invariant.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        let raw = (self.completed_steps() as f64 / self.total_steps as f64) * 100.0;
        (raw * 100.0).round() / 100.0
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Validates that the dependency graph is a DAG via Kahn's algorithm,
    /// and that every dependency id actually names a step in this plan.
    /// Rejects cyclic plans with `Error::Internal` before any step runs
    /// (spec.md §4.5 "Cycle detection at plan load", §9 "no runtime cycle
    /// detection is required").
    pub fn validate(&self) -> Result<Vec<String>> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::internal(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dep
                    )));
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            in_degree.entry(step.step_id.as_str()).or_insert(0);
            for dep in &step.dependencies {
                *in_degree.entry(step.step_id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.step_id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(deps) = dependents.get(id) {
                for dependent in deps {
                    let deg = in_degree.get_mut(dependent).expect("tracked in_degree");
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            return Err(Error::internal(
                "step dependency graph contains a cycle",
            ));
        }

        Ok(order)
    }
}

/// A serialisable, timestamp-stripped projection of a plan used by the
/// round-trip persistence test (spec.md §8: "Persisting then reloading a
/// plan yields an equal plan structurally, modulo timestamps").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: Uuid,
    pub research_question: String,
    pub status: PlanStatus,
    pub security_level: SecurityLevel,
    pub total_steps: u32,
    pub step_ids: Vec<String>,
    pub step_statuses: Vec<StepStatus>,
}

impl From<&Plan> for PlanSnapshot {
    fn from(plan: &Plan) -> Self {
        Self {
            plan_id: plan.plan_id,
            research_question: plan.research_question.clone(),
            status: plan.status,
            security_level: plan.security_level,
            total_steps: plan.total_steps,
            step_ids: plan.steps.iter().map(|s| s.step_id.clone()).collect(),
            step_statuses: plan.steps.iter().map(|s| s.status).collect(),
        }
    }
}
