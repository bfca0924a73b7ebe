//! Append-only metric records, one per finished stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::context::ProjectContext;
use crate::swarm::Execution;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub workflow_id: String,
    /// Stage name, or the orchestration id when one ran
    pub source: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub notes: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(workflow_id: &str, source: impl Into<String>) -> Self {
        Self {
            id: format!("insight-{}", uuid::Uuid::new_v4()),
            workflow_id: workflow_id.to_string(),
            source: source.into(),
            metrics: BTreeMap::new(),
            notes: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// What the context analysis found
    pub fn from_context(workflow_id: &str, stage: &str, context: &ProjectContext) -> Self {
        let mut insight = Self::new(workflow_id, stage)
            .with_metric("frameworks", context.frameworks.len() as f64);
        for (label, value) in [
            ("language", &context.language),
            ("test_framework", &context.test_framework),
            ("build_system", &context.build_system),
        ] {
            if let Some(value) = value {
                insight = insight.with_note(format!("{}: {}", label, value));
            }
        }
        insight
    }

    /// Figures from one orchestration, plus every metric its result reported
    pub fn from_execution(workflow_id: &str, execution: &Execution, elapsed: Duration) -> Self {
        let mut insight = Self::new(workflow_id, execution.id.as_str())
            .with_metric("duration_ms", elapsed.as_millis() as f64)
            .with_metric("phases", execution.phases.len() as f64)
            .with_metric("agents", execution.agents.len() as f64)
            .with_metric("conflicts", execution.conflicts.len() as f64)
            .with_metric("escalations", execution.escalations().count() as f64)
            .with_metric("failed_agents", execution.failed_agents().count() as f64)
            .with_note(format!("status: {}", execution.status.as_str()));

        if let Some(result) = &execution.result {
            for (name, value) in &result.metrics {
                insight.metrics.insert(format!("result.{}", name), *value);
            }
        }
        insight
    }
}
