//! # Conductor Database
//!
//! Single SQLite database for workflow, execution and insight records,
//! stored at `.conductor/conductor.db` by default. Records are kept as JSON
//! documents next to the columns used for listing.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Listing columns of a stored workflow
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRow {
    pub id: String,
    pub intent: String,
    pub status: String,
    pub current_stage: i64,
    pub stage_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing columns of a stored execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRow {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub status: String,
    pub started_at: String,
}

#[derive(Clone)]
pub struct ConductorDb {
    conn: Arc<Mutex<Connection>>,
}

impl ConductorDb {
    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open conductor database")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
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
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                intent TEXT NOT NULL,
                status TEXT NOT NULL,
                current_stage INTEGER NOT NULL DEFAULT 0,
                stage_count INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
            [],
        )?;

        // Append-only
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS insights (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                source TEXT NOT NULL,
                data TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_workflows_updated ON workflows(updated_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_task ON executions(task_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_insights_workflow ON insights(workflow_id)",
            [],
        )?;

        tracing::info!(
            "ConductorDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    pub fn upsert_workflow(&self, row: &WorkflowRow, data: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO workflows (id, intent, status, current_stage, stage_count, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                status = ?3,
                current_stage = ?4,
                stage_count = ?5,
                data = ?6,
                updated_at = ?8
            "#,
            params![
                row.id,
                row.intent,
                row.status,
                row.current_stage,
                row.stage_count,
                data,
                row.created_at,
                row.updated_at
            ],
        )
        .with_context(|| format!("Failed to save workflow '{}'", row.id))?;

        Ok(())
    }

    pub fn get_workflow_data(&self, id: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT data FROM workflows WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to load workflow '{}'", id))
    }

    /// Most recently updated first
    pub fn list_workflows(&self, limit: usize) -> Result<Vec<WorkflowRow>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, intent, status, current_stage, stage_count, created_at, updated_at
            FROM workflows ORDER BY updated_at DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(WorkflowRow {
                id: row.get(0)?,
                intent: row.get(1)?,
                status: row.get(2)?,
                current_stage: row.get(3)?,
                stage_count: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;

        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row?);
        }
        Ok(workflows)
    }

    // =========================================================================
    // Executions
    // =========================================================================

    pub fn upsert_execution(
        &self,
        row: &ExecutionRow,
        completed_at: Option<&str>,
        data: &str,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO executions (id, task_id, task_name, status, data, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                status = ?4,
                data = ?5,
                completed_at = ?7
            "#,
            params![
                row.id,
                row.task_id,
                row.task_name,
                row.status,
                data,
                row.started_at,
                completed_at
            ],
        )
        .with_context(|| format!("Failed to save execution '{}'", row.id))?;

        Ok(())
    }

    pub fn get_execution_data(&self, id: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT data FROM executions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to load execution '{}'", id))
    }

    /// Most recent first
    pub fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRow>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, task_id, task_name, status, started_at
            FROM executions ORDER BY started_at DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ExecutionRow {
                id: row.get(0)?,
                task_id: row.get(1)?,
                task_name: row.get(2)?,
                status: row.get(3)?,
                started_at: row.get(4)?,
            })
        })?;

        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?);
        }
        Ok(executions)
    }

    // =========================================================================
    // Insights
    // =========================================================================

    /// Insert once; returns false when the id already exists
    pub fn insert_insight(
        &self,
        id: &str,
        workflow_id: &str,
        source: &str,
        recorded_at: &str,
        data: &str,
    ) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO insights (id, workflow_id, source, data, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![id, workflow_id, source, data, recorded_at],
            )
            .with_context(|| format!("Failed to append insight '{}'", id))?;

        Ok(inserted > 0)
    }

    /// Insight documents for a workflow, in recording order
    pub fn list_insight_data(&self, workflow_id: &str) -> Result<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT data FROM insights WHERE workflow_id = ?1 ORDER BY recorded_at, rowid",
        )?;
        let rows = stmt.query_map(params![workflow_id], |row| row.get(0))?;

        let mut insights = Vec::new();
        for row in rows {
            insights.push(row?);
        }
        Ok(insights)
    }
}
