//! # Run Store
//!
//! Persistence sink for execution records, workflows and insights.
//! Re-saving a record with the same id replaces it; insights are written once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use super::db::{ConductorDb, ExecutionRow, WorkflowRow};
use crate::swarm::Execution;
use crate::workflow::{Insight, Workflow};

/// One line of workflow history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub intent: String,
    pub status: String,
    pub current_stage: usize,
    pub stage_count: usize,
    pub updated_at: String,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    async fn load_execution(&self, id: &str) -> Result<Option<Execution>>;

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn load_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    /// Most recently updated first
    async fn list_workflows(&self, limit: usize) -> Result<Vec<WorkflowSummary>>;

    async fn append_insight(&self, insight: &Insight) -> Result<()>;

    /// In recording order
    async fn list_insights(&self, workflow_id: &str) -> Result<Vec<Insight>>;
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteRunStore {
    db: ConductorDb,
}

impl SqliteRunStore {
    pub fn new(db: ConductorDb) -> Self {
        Self { db }
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(ConductorDb::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(ConductorDb::open_in_memory()?))
    }

    pub fn db(&self) -> &ConductorDb {
        &self.db
    }

    /// Recent executions as stored rows
    pub async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRow>> {
        self.blocking(move |db| db.list_executions(limit)).await
    }

    /// Run a database call off the async executor
    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&ConductorDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || call(&db))
            .await
            .context("Database task failed")?
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        let data = serde_json::to_string(execution).context("Failed to serialize execution")?;
        let row = ExecutionRow {
            id: execution.id.clone(),
            task_id: execution.task_id.clone(),
            task_name: execution.task_name.clone(),
            status: execution.status.as_str().to_string(),
            started_at: timestamp(&execution.started_at),
        };
        let completed_at = execution.completed_at.as_ref().map(timestamp);
        self.blocking(move |db| db.upsert_execution(&row, completed_at.as_deref(), &data))
            .await
    }

    async fn load_execution(&self, id: &str) -> Result<Option<Execution>> {
        let key = id.to_string();
        self.blocking(move |db| db.get_execution_data(&key))
            .await?
            .map(|data| {
                serde_json::from_str(&data)
                    .with_context(|| format!("Corrupt execution record '{}'", id))
            })
            .transpose()
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let data = serde_json::to_string(workflow).context("Failed to serialize workflow")?;
        let row = WorkflowRow {
            id: workflow.id.clone(),
            intent: workflow.intent.clone(),
            status: workflow.status.as_str().to_string(),
            current_stage: workflow.current_stage as i64,
            stage_count: workflow.stages.len() as i64,
            created_at: timestamp(&workflow.created_at),
            updated_at: timestamp(&workflow.updated_at),
        };
        self.blocking(move |db| db.upsert_workflow(&row, &data)).await
    }

    async fn load_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let key = id.to_string();
        self.blocking(move |db| db.get_workflow_data(&key))
            .await?
            .map(|data| {
                serde_json::from_str(&data)
                    .with_context(|| format!("Corrupt workflow record '{}'", id))
            })
            .transpose()
    }

    async fn list_workflows(&self, limit: usize) -> Result<Vec<WorkflowSummary>> {
        Ok(self
            .blocking(move |db| db.list_workflows(limit))
            .await?
            .into_iter()
            .map(|row| WorkflowSummary {
                id: row.id,
                intent: row.intent,
                status: row.status,
                current_stage: row.current_stage.max(0) as usize,
                stage_count: row.stage_count.max(0) as usize,
                updated_at: row.updated_at,
            })
            .collect())
    }

    async fn append_insight(&self, insight: &Insight) -> Result<()> {
        let data = serde_json::to_string(insight).context("Failed to serialize insight")?;
        let (id, workflow_id, source) = (
            insight.id.clone(),
            insight.workflow_id.clone(),
            insight.source.clone(),
        );
        let recorded_at = timestamp(&insight.recorded_at);
        let inserted = self
            .blocking(move |db| db.insert_insight(&id, &workflow_id, &source, &recorded_at, &data))
            .await?;
        if !inserted {
            tracing::debug!(insight_id = %insight.id, "Insight already recorded");
        }
        Ok(())
    }

    async fn list_insights(&self, workflow_id: &str) -> Result<Vec<Insight>> {
        let key = workflow_id.to_string();
        self.blocking(move |db| db.list_insight_data(&key))
            .await?
            .iter()
            .map(|data| serde_json::from_str(data).context("Corrupt insight record"))
            .collect()
    }
}

#[derive(Default)]
struct MemoryState {
    executions: Vec<Execution>,
    workflows: Vec<Workflow>,
    insights: Vec<Insight>,
}

/// In-process store
#[derive(Default)]
pub struct MemoryRunStore {
    state: Mutex<MemoryState>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// Saved executions, first save order
    pub fn executions(&self) -> Vec<Execution> {
        self.lock().map(|s| s.executions.clone()).unwrap_or_default()
    }

    pub fn workflows(&self) -> Vec<Workflow> {
        self.lock().map(|s| s.workflows.clone()).unwrap_or_default()
    }

    pub fn insights(&self) -> Vec<Insight> {
        self.lock().map(|s| s.insights.clone()).unwrap_or_default()
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        let mut state = self.lock()?;
        upsert(&mut state.executions, execution.clone(), |e| e.id == execution.id);
        Ok(())
    }

    async fn load_execution(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self.lock()?.executions.iter().find(|e| e.id == id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut state = self.lock()?;
        upsert(&mut state.workflows, workflow.clone(), |w| w.id == workflow.id);
        Ok(())
    }

    async fn load_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.lock()?.workflows.iter().find(|w| w.id == id).cloned())
    }

    async fn list_workflows(&self, limit: usize) -> Result<Vec<WorkflowSummary>> {
        let state = self.lock()?;
        let mut workflows: Vec<&Workflow> = state.workflows.iter().collect();
        workflows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(workflows
            .into_iter()
            .take(limit)
            .map(|w| WorkflowSummary {
                id: w.id.clone(),
                intent: w.intent.clone(),
                status: w.status.as_str().to_string(),
                current_stage: w.current_stage,
                stage_count: w.stages.len(),
                updated_at: timestamp(&w.updated_at),
            })
            .collect())
    }

    async fn append_insight(&self, insight: &Insight) -> Result<()> {
        let mut state = self.lock()?;
        if !state.insights.iter().any(|i| i.id == insight.id) {
            state.insights.push(insight.clone());
        }
        Ok(())
    }

    async fn list_insights(&self, workflow_id: &str) -> Result<Vec<Insight>> {
        Ok(self
            .lock()?
            .insights
            .iter()
            .filter(|i| i.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}
