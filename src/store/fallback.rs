//! JSON append-only fallback store (spec.md §4.10 "fallback persistence"),
//! used when the primary SQLite store is unreachable. Each table is one
//! JSON-lines file; later records with the same key win, so replaying the
//! file into the primary is a pure upsert even if it was appended to many
//! times for the same plan.

use super::{ConsistencyHint, StateStore};
use crate::domain::{ExecutionLogEntry, Plan, Step, StepResult};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const PLANS_FILE: &str = "research_plans.jsonl";
const STEPS_FILE: &str = "research_plan_steps.jsonl";
const STEP_RESULTS_FILE: &str = "step_results.jsonl";
const EXECUTION_LOG_FILE: &str = "execution_log.jsonl";

#[derive(serde::Serialize, serde::Deserialize)]
struct StepRecord {
    plan_id: uuid::Uuid,
    step: Step,
}

pub struct FallbackStore {
    base_dir: PathBuf,
    /// Serialises appends within this process; separate OS processes would
    /// still need file locking, out of scope here (spec.md §9 "single
    /// engine instance").
    write_lock: Mutex<()>,
}

impl FallbackStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(|e| Error::Store(format!("cannot create fallback dir: {e}")))?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.base_dir.join(file)
    }

    fn append_line(&self, file: &str, record: &impl serde::Serialize) -> Result<()> {
        let _guard = self.write_lock.lock().expect("fallback store lock poisoned");
        let line = serde_json::to_string(record)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file))
            .map_err(|e| Error::Store(format!("cannot open fallback file {file}: {e}")))?;
        writeln!(handle, "{line}").map_err(|e| Error::Store(format!("fallback write failed: {e}")))?;
        Ok(())
    }

    fn read_lines<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let handle = fs::File::open(&path)
            .map_err(|e| Error::Store(format!("cannot open fallback file {file}: {e}")))?;
        let mut out = Vec::new();
        for line in BufReader::new(handle).lines() {
            let line = line.map_err(|e| Error::Store(format!("fallback read failed: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    pub fn append_plan(&self, plan: &Plan) -> Result<()> {
        self.append_line(PLANS_FILE, plan)
    }

    pub fn append_step(&self, step: &Step) -> Result<()> {
        self.append_line(
            STEPS_FILE,
            &StepRecord {
                plan_id: step.plan_id,
                step: step.clone(),
            },
        )
    }

    pub fn append_step_result(&self, result: &StepResult) -> Result<()> {
        self.append_line(STEP_RESULTS_FILE, result)
    }

    pub fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        self.append_line(EXECUTION_LOG_FILE, entry)
    }

    /// Replays every appended record into `primary`, last-write-wins per
    /// key. Plans and steps carry their own identity, so replay is a series
    /// of idempotent upserts; step results and log entries are append-only
    /// and simply re-inserted (spec.md §6 "Replaying the fallback into the
    /// primary is a pure insert").
    pub async fn replay_into(&self, primary: &dyn StateStore) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();

        let plans: Vec<Plan> = self.read_lines(PLANS_FILE)?;
        let mut latest_plans: HashMap<uuid::Uuid, Plan> = HashMap::new();
        for plan in plans {
            latest_plans.insert(plan.plan_id, plan);
        }
        for plan in latest_plans.values() {
            primary.create_plan(plan, ConsistencyHint::BestEffort).await?;
            report.plans_replayed += 1;
        }

        let steps: Vec<StepRecord> = self.read_lines(STEPS_FILE)?;
        let mut latest_steps: HashMap<(uuid::Uuid, String), Step> = HashMap::new();
        for record in steps {
            latest_steps.insert((record.plan_id, record.step.step_id.clone()), record.step);
        }
        for step in latest_steps.values() {
            primary.create_step(step, ConsistencyHint::BestEffort).await?;
            report.steps_replayed += 1;
        }

        for result in self.read_lines::<StepResult>(STEP_RESULTS_FILE)? {
            primary.append_step_result(&result).await?;
            report.step_results_replayed += 1;
        }

        for entry in self.read_lines::<ExecutionLogEntry>(EXECUTION_LOG_FILE)? {
            primary.append_log(&entry).await?;
            report.log_entries_replayed += 1;
        }

        Ok(report)
    }

    /// Path a fallback store would use under a given root, following the
    /// teacher's `data/`-relative layout convention.
    pub fn default_base_dir(data_root: impl AsRef<Path>) -> PathBuf {
        data_root.as_ref().join("fallback_db")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub plans_replayed: usize,
    pub steps_replayed: usize,
    pub step_results_replayed: usize,
    pub log_entries_replayed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, SecurityLevel, Step, StepType};
    use crate::store::SqliteStateStore;
    use tempfile::tempdir;

    fn sample_plan() -> Plan {
        let plan_id = uuid::Uuid::new_v4();
        let step = Step::new(plan_id, 0, "s1", "find sources", StepType::Retrieval);
        Plan::new("q", SecurityLevel::Public).with_steps(vec![step])
    }

    #[test]
    fn append_and_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();
        let plan = sample_plan();
        store.append_plan(&plan).unwrap();

        let read: Vec<Plan> = store.read_lines(PLANS_FILE).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].plan_id, plan.plan_id);
    }

    #[test]
    fn last_write_wins_on_duplicate_plan_id() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();
        let mut plan = sample_plan();
        store.append_plan(&plan).unwrap();
        plan.status = crate::domain::PlanStatus::Completed;
        store.append_plan(&plan).unwrap();

        let read: Vec<Plan> = store.read_lines(PLANS_FILE).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.last().unwrap().status, crate::domain::PlanStatus::Completed);
    }

    #[tokio::test]
    async fn replay_into_reconciles_with_primary() {
        let dir = tempdir().unwrap();
        let fallback = FallbackStore::new(dir.path()).unwrap();
        let plan = sample_plan();
        fallback.append_plan(&plan).unwrap();
        fallback.append_step(&plan.steps[0]).unwrap();

        let primary = SqliteStateStore::in_memory().unwrap();
        let report = fallback.replay_into(&primary).await.unwrap();
        assert_eq!(report.plans_replayed, 1);
        assert_eq!(report.steps_replayed, 1);

        let loaded = primary.get_plan(plan.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 1);
    }
}
