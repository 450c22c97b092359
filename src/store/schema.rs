//! SQLite schema for the primary state store (spec.md §6 "Persisted-state
//! layout"): `research_plans`, `research_plan_steps`, `step_results`,
//! `execution_log`. Modelled on the teacher's `memory::schema` migration
//! pattern (WAL mode, a `schema_version` table, idempotent `initialize`).

use rusqlite::{Connection, Result as SqliteResult};

pub const SCHEMA_VERSION: i32 = 1;

pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS research_plans (
            plan_id TEXT PRIMARY KEY,
            research_question TEXT NOT NULL,
            status TEXT NOT NULL,
            security_level TEXT NOT NULL,
            total_steps INTEGER NOT NULL,
            uds3_databases TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS research_plan_steps (
            plan_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            step_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            step_type TEXT NOT NULL,
            status TEXT NOT NULL,
            dependencies TEXT NOT NULL DEFAULT '[]',
            parallel_group TEXT,
            agent_capability_req TEXT NOT NULL DEFAULT '[]',
            input_ref TEXT NOT NULL DEFAULT '',
            attempt INTEGER NOT NULL DEFAULT 0,
            confidence REAL,
            quality_score REAL,
            error TEXT,
            result TEXT,
            started_at TEXT,
            completed_at TEXT,
            execution_ms INTEGER,
            PRIMARY KEY (plan_id, step_id),
            FOREIGN KEY (plan_id) REFERENCES research_plans(plan_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS step_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            result_data TEXT NOT NULL,
            confidence REAL NOT NULL,
            quality REAL NOT NULL,
            sources TEXT NOT NULL DEFAULT '[]',
            recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (plan_id) REFERENCES research_plans(plan_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS execution_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            event_type TEXT NOT NULL,
            agent_id TEXT,
            payload TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            FOREIGN KEY (plan_id) REFERENCES research_plans(plan_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_steps_plan ON research_plan_steps(plan_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_plan_step ON step_results(plan_id, step_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_log_plan ON execution_log(plan_id)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='research_plans'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn));
    }
}
