//! SQLite-backed primary state store. Mirrors the teacher's
//! `SqliteMemoryStore`: a single `Arc<Mutex<Connection>>` guarded by a
//! `with_conn` helper that maps `rusqlite::Error` onto the crate's own
//! error type.

use super::schema::{initialize_schema, is_initialized};
use super::{ConsistencyHint, PlanFilters, StateStore};
use crate::domain::{
    ExecutionLogEntry, Plan, PlanStatus, SecurityLevel, Step, StepResult, StepStatus, StepType,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    /// Flipped by tests to simulate the primary becoming unreachable
    /// (spec.md §8 "store fallback" scenario) without tearing down the
    /// connection.
    disabled: AtomicBool,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            disabled: AtomicBool::new(false),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            disabled: AtomicBool::new(false),
        })
    }

    /// Simulates a primary-store outage: every operation returns
    /// `ResourceUnavailable` until `enable()` is called.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    fn check_enabled(&self) -> Result<()> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(Error::resource_unavailable(
                "sqlite_store",
                "primary state store is unreachable",
            ));
        }
        Ok(())
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        self.check_enabled()?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::internal(format!("failed to lock state store connection: {e}")))?;
        f(&conn).map_err(|e| Error::Store(e.to_string()))
    }

    fn write_plan_row(conn: &Connection, plan: &Plan) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO research_plans
                (plan_id, research_question, status, security_level, total_steps, uds3_databases)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(plan_id) DO UPDATE SET
                research_question = excluded.research_question,
                status = excluded.status,
                security_level = excluded.security_level,
                total_steps = excluded.total_steps,
                uds3_databases = excluded.uds3_databases,
                updated_at = datetime('now')",
            params![
                plan.plan_id.to_string(),
                plan.research_question,
                status_str(plan.status),
                security_level_str(plan.security_level),
                plan.total_steps,
                serde_json::to_string(&plan.uds3_databases).unwrap_or_else(|_| "[]".to_string()),
            ],
        )?;
        for step in &plan.steps {
            Self::write_step_row(conn, step)?;
        }
        Ok(())
    }

    fn write_step_row(conn: &Connection, step: &Step) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO research_plan_steps
                (plan_id, step_id, step_index, name, step_type, status, dependencies,
                 parallel_group, agent_capability_req, input_ref, attempt, confidence, quality_score,
                 error, result, started_at, completed_at, execution_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(plan_id, step_id) DO UPDATE SET
                step_index = excluded.step_index,
                name = excluded.name,
                step_type = excluded.step_type,
                status = excluded.status,
                dependencies = excluded.dependencies,
                parallel_group = excluded.parallel_group,
                agent_capability_req = excluded.agent_capability_req,
                input_ref = excluded.input_ref,
                attempt = excluded.attempt,
                confidence = excluded.confidence,
                quality_score = excluded.quality_score,
                error = excluded.error,
                result = excluded.result,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                execution_ms = excluded.execution_ms",
            params![
                step.plan_id.to_string(),
                step.step_id,
                step.index,
                step.name,
                step_type_str(step.step_type),
                step_status_str(step.status),
                serde_json::to_string(&step.dependencies).unwrap_or_else(|_| "[]".to_string()),
                step.parallel_group,
                serde_json::to_string(&step.agent_capability_req)
                    .unwrap_or_else(|_| "[]".to_string()),
                step.input_ref,
                step.attempt,
                step.confidence,
                step.quality_score,
                step.error,
                step.result.as_ref().map(|v| v.to_string()),
                step.started_at.map(|t| t.to_rfc3339()),
                step.completed_at.map(|t| t.to_rfc3339()),
                step.execution_ms,
            ],
        )?;
        Ok(())
    }

    fn read_plan_row(conn: &Connection, plan_id: Uuid) -> rusqlite::Result<Option<Plan>> {
        let plan_row = conn
            .query_row(
                "SELECT research_question, status, security_level, total_steps, uds3_databases
                 FROM research_plans WHERE plan_id = ?1",
                params![plan_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((question, status, security_level, total_steps, uds3_databases)) = plan_row
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT step_id, step_index, name, step_type, status, dependencies, parallel_group,
                    agent_capability_req, input_ref, attempt, confidence, quality_score, error, result,
                    started_at, completed_at, execution_ms
             FROM research_plan_steps WHERE plan_id = ?1 ORDER BY step_index ASC",
        )?;
        let steps = stmt
            .query_map(params![plan_id.to_string()], |row| {
                Ok(Step {
                    step_id: row.get(0)?,
                    plan_id,
                    index: row.get(1)?,
                    name: row.get(2)?,
                    step_type: parse_step_type(&row.get::<_, String>(3)?),
                    status: parse_step_status(&row.get::<_, String>(4)?),
                    dependencies: parse_json_vec(&row.get::<_, String>(5)?),
                    parallel_group: row.get(6)?,
                    agent_capability_req: parse_json_vec(&row.get::<_, String>(7)?),
                    input_ref: row.get(8)?,
                    attempt: row.get(9)?,
                    confidence: row.get(10)?,
                    quality_score: row.get(11)?,
                    error: row.get(12)?,
                    result: row
                        .get::<_, Option<String>>(13)?
                        .and_then(|s| serde_json::from_str(&s).ok()),
                    started_at: row
                        .get::<_, Option<String>>(14)?
                        .and_then(|s| parse_timestamp(&s)),
                    completed_at: row
                        .get::<_, Option<String>>(15)?
                        .and_then(|s| parse_timestamp(&s)),
                    execution_ms: row.get(16)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Plan {
            plan_id,
            research_question: question,
            status: parse_plan_status(&status),
            uds3_databases: parse_json_vec(&uds3_databases),
            security_level: parse_security_level(&security_level),
            total_steps,
            steps,
        }))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_plan(&self, plan: &Plan, _hint: ConsistencyHint) -> Result<()> {
        self.with_conn(|conn| Self::write_plan_row(conn, plan))
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        self.with_conn(|conn| Self::read_plan_row(conn, plan_id))
    }

    async fn update_plan(&self, plan: &Plan, _hint: ConsistencyHint) -> Result<()> {
        self.with_conn(|conn| Self::write_plan_row(conn, plan))
    }

    async fn list_plans(&self, filters: &PlanFilters) -> Result<Vec<Plan>> {
        let ids: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT plan_id FROM research_plans")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut plans = Vec::new();
        for id in ids {
            let Ok(plan_id) = Uuid::parse_str(&id) else {
                continue;
            };
            if let Some(plan) = self.get_plan(plan_id).await? {
                if filters.matches(&plan) {
                    plans.push(plan);
                }
            }
        }
        Ok(plans)
    }

    async fn create_step(&self, step: &Step, _hint: ConsistencyHint) -> Result<()> {
        self.with_conn(|conn| Self::write_step_row(conn, step))
    }

    async fn update_step(&self, step: &Step, _hint: ConsistencyHint) -> Result<()> {
        self.with_conn(|conn| Self::write_step_row(conn, step))
    }

    async fn append_step_result(&self, result: &StepResult) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO step_results (plan_id, step_id, result_data, confidence, quality, sources)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    result.plan_id.to_string(),
                    result.step_id,
                    result.result_data.to_string(),
                    result.confidence,
                    result.quality,
                    serde_json::to_string(&result.sources).unwrap_or_else(|_| "[]".to_string()),
                ],
            )?;
            Ok(())
        })
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO execution_log (plan_id, timestamp, event_type, agent_id, payload, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.plan_id.to_string(),
                    entry.timestamp.to_rfc3339(),
                    entry.event_type,
                    entry.agent_id,
                    entry.payload.to_string(),
                    entry.error,
                ],
            )?;
            Ok(())
        })
    }
}

fn status_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Pending => "pending",
        PlanStatus::Running => "running",
        PlanStatus::Paused => "paused",
        PlanStatus::Completed => "completed",
        PlanStatus::Failed => "failed",
        PlanStatus::Cancelled => "cancelled",
    }
}

fn parse_plan_status(s: &str) -> PlanStatus {
    match s {
        "running" => PlanStatus::Running,
        "paused" => PlanStatus::Paused,
        "completed" => PlanStatus::Completed,
        "failed" => PlanStatus::Failed,
        "cancelled" => PlanStatus::Cancelled,
        _ => PlanStatus::Pending,
    }
}

fn security_level_str(level: SecurityLevel) -> &'static str {
    match level {
        SecurityLevel::Public => "public",
        SecurityLevel::Internal => "internal",
        SecurityLevel::Confidential => "confidential",
        SecurityLevel::Secret => "secret",
    }
}

fn parse_security_level(s: &str) -> SecurityLevel {
    match s {
        "internal" => SecurityLevel::Internal,
        "confidential" => SecurityLevel::Confidential,
        "secret" => SecurityLevel::Secret,
        _ => SecurityLevel::Public,
    }
}

fn step_type_str(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Search => "search",
        StepType::Retrieval => "retrieval",
        StepType::Analysis => "analysis",
        StepType::Synthesis => "synthesis",
        StepType::Comparison => "comparison",
        StepType::Calculation => "calculation",
        StepType::Validation => "validation",
        StepType::Aggregation => "aggregation",
    }
}

fn parse_step_type(s: &str) -> StepType {
    match s {
        "search" => StepType::Search,
        "analysis" => StepType::Analysis,
        "synthesis" => StepType::Synthesis,
        "comparison" => StepType::Comparison,
        "calculation" => StepType::Calculation,
        "validation" => StepType::Validation,
        "aggregation" => StepType::Aggregation,
        _ => StepType::Retrieval,
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}

fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "skipped" => StepStatus::Skipped,
        _ => StepStatus::Pending,
    }
}

fn parse_json_vec(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
