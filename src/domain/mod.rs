//! Shared data-model records (spec.md §3), the typed contracts every
//! component exchanges instead of loosely-typed maps — per spec.md §9
//! "Dynamic-typing -> explicit contracts".

mod citation;
mod evidence;
mod plan;
mod query;

pub use citation::{Source, SourceKind};
pub use evidence::{EvidenceChunk, EvidenceMetadata, EvidenceSource};
pub use plan::{
    ExecutionLogEntry, Plan, PlanSnapshot, PlanStatus, SecurityLevel, Step, StepResult,
    StepStatus, StepType,
};
pub use query::{QuerySession, RunStatus};
