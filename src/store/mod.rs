//! State Store (C10, spec.md §4.10): persists research plans, step
//! results, and the execution log behind a single typed trait so callers
//! never know whether a request's data landed in SQLite or the JSON
//! fallback. Grounded on the teacher's `memory::store::SqliteMemoryStore`
//! (`Arc<Mutex<Connection>>` plus a `with_conn` closure helper).

mod fallback;
mod resilient;
mod schema;
mod sqlite_store;

pub use fallback::FallbackStore;
pub use resilient::ResilientStateStore;
pub use sqlite_store::SqliteStateStore;

use crate::domain::{ExecutionLogEntry, Plan, PlanStatus, Step, StepResult};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Per-call durability requirement (spec.md §4.10 "Consistency hints").
/// `BestEffort` lets the store swallow a primary-backend outage by writing
/// to the fallback instead; `MustPersist` fails loudly rather than risk
/// silently losing a write the caller cannot afford to lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyHint {
    BestEffort,
    MustPersist,
}

/// Filter set for `list_plans` (spec.md §4.10 "listing/filtering").
#[derive(Debug, Clone, Default)]
pub struct PlanFilters {
    pub status: Option<PlanStatus>,
    pub research_question_contains: Option<String>,
}

impl PlanFilters {
    fn matches(&self, plan: &Plan) -> bool {
        if let Some(status) = self.status {
            if plan.status != status {
                return false;
            }
        }
        if let Some(needle) = &self.research_question_contains {
            if !plan.research_question.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The state-store contract every backend implements (spec.md §4.10
/// "Operations"). All operations are async so a backend can perform real
/// I/O without blocking the caller's task.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_plan(&self, plan: &Plan, hint: ConsistencyHint) -> Result<()>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>>;
    async fn update_plan(&self, plan: &Plan, hint: ConsistencyHint) -> Result<()>;
    async fn list_plans(&self, filters: &PlanFilters) -> Result<Vec<Plan>>;
    async fn create_step(&self, step: &Step, hint: ConsistencyHint) -> Result<()>;
    async fn update_step(&self, step: &Step, hint: ConsistencyHint) -> Result<()>;
    async fn append_step_result(&self, result: &StepResult) -> Result<()>;
    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()>;
}
