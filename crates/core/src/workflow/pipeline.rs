//! # Workflow State Machine
//!
//! ```text
//! created → active → completed
//!                  ↘ failed
//! stage: pending → running → validated
//!                          ↘ failed
//! ```
//!
//! Transitions only move forward. `current_stage` advances when a stage is
//! validated and equals `stages.len()` once the workflow completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::insight::Insight;
use super::planner::IntentKind;
use crate::context::ProjectContext;
use crate::swarm::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Active,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Validated,
    Failed,
}

/// What a stage is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Context analysis; never orchestrates
    Discovery,
    Design,
    Implementation,
    Refactoring,
    Optimization,
    SecurityAudit,
    Verification,
    Documentation,
    Release,
    Monitoring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    /// Orchestrated when present
    #[serde(default)]
    pub task: Option<Task>,
    pub status: StageStatus,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub fn new(name: impl Into<String>, kind: StageKind, task: Option<Task>) -> Self {
        Self {
            name: name.into(),
            kind,
            task,
            status: StageStatus::Pending,
            execution_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A post-flight check that did not pass; recorded, never fatal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostFlightWarning {
    pub stage: String,
    pub check: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Where and why a workflow failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub stage: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub intent: String,
    pub intent_kind: IntentKind,
    /// Snapshot taken once at workflow start
    #[serde(default)]
    pub context: ProjectContext,
    pub stages: Vec<Stage>,
    pub current_stage: usize,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub warnings: Vec<PostFlightWarning>,
    #[serde(default)]
    pub failure: Option<FailureReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(intent: impl Into<String>, intent_kind: IntentKind) -> Self {
        let now = Utc::now();
        Self {
            id: format!("wf-{}", uuid::Uuid::new_v4()),
            intent: intent.into(),
            intent_kind,
            context: ProjectContext::default(),
            stages: Vec::new(),
            current_stage: 0,
            status: WorkflowStatus::Created,
            insights: Vec::new(),
            warnings: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// created → active with the planned stages
    pub fn activate(&mut self, context: ProjectContext, stages: Vec<Stage>) -> bool {
        if self.status != WorkflowStatus::Created {
            return false;
        }
        self.context = context;
        self.stages = stages;
        self.status = WorkflowStatus::Active;
        self.touch();
        true
    }

    pub fn current(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage)
    }

    /// Move the current stage from pending to running
    pub fn begin_stage(&mut self) -> Option<&Stage> {
        if self.status != WorkflowStatus::Active {
            return None;
        }
        let stage = self.stages.get_mut(self.current_stage)?;
        if stage.status != StageStatus::Pending {
            return None;
        }
        stage.status = StageStatus::Running;
        stage.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self.stages.get(self.current_stage)
    }

    pub fn attach_execution(&mut self, execution_id: &str) {
        if let Some(stage) = self.stages.get_mut(self.current_stage) {
            stage.execution_id = Some(execution_id.to_string());
        }
    }

    /// running → validated, then advance to the next stage
    pub fn validate_stage(&mut self) -> bool {
        let Some(stage) = self.stages.get_mut(self.current_stage) else {
            return false;
        };
        if stage.status != StageStatus::Running {
            return false;
        }
        stage.status = StageStatus::Validated;
        stage.finished_at = Some(Utc::now());
        self.current_stage += 1;
        self.touch();
        true
    }

    /// active → completed; only once every stage is validated
    pub fn complete(&mut self) -> bool {
        let all_validated = self
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Validated);
        if self.status != WorkflowStatus::Active
            || !all_validated
            || self.current_stage != self.stages.len()
        {
            return false;
        }
        self.status = WorkflowStatus::Completed;
        self.touch();
        true
    }

    /// Fail the running stage (if any) and the workflow
    pub fn fail(&mut self, report: FailureReport) {
        if self.status.is_terminal() {
            return;
        }
        if let Some(stage) = self.stages.get_mut(self.current_stage) {
            if stage.status == StageStatus::Running {
                stage.status = StageStatus::Failed;
                stage.finished_at = Some(Utc::now());
            }
        }
        self.failure = Some(report);
        self.status = WorkflowStatus::Failed;
        self.touch();
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage() -> Workflow {
        let mut workflow = Workflow::new("add login", IntentKind::Feature);
        workflow.activate(
            ProjectContext::default(),
            vec![
                Stage::new("Context Analysis", StageKind::Discovery, None),
                Stage::new("Implementation", StageKind::Implementation, None),
            ],
        );
        workflow
    }

    #[test]
    fn test_workflow_advance() {
        let mut workflow = two_stage();
        assert_eq!(workflow.status, WorkflowStatus::Active);

        for expected in 1..=2 {
            assert!(workflow.begin_stage().is_some());
            assert!(workflow.validate_stage());
            assert_eq!(workflow.current_stage, expected);
        }
        assert!(workflow.complete());
        assert_eq!(workflow.current_stage, workflow.stages.len());
        assert!(workflow.is_success());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let mut workflow = two_stage();
        // Cannot validate a stage that never ran
        assert!(!workflow.validate_stage());
        // Cannot complete early
        assert!(!workflow.complete());

        workflow.begin_stage();
        assert!(workflow.begin_stage().is_none());
        assert!(!workflow.activate(ProjectContext::default(), Vec::new()));
        assert_eq!(workflow.current_stage, 0);
    }

    #[test]
    fn test_complete_requires_every_stage_validated() {
        let mut workflow = two_stage();
        workflow.begin_stage();
        workflow.validate_stage();
        assert!(!workflow.complete());
        assert_eq!(workflow.status, WorkflowStatus::Active);

        workflow.begin_stage();
        workflow.validate_stage();
        assert!(workflow.complete());
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(!workflow.complete());
    }

    #[test]
    fn test_fail_marks_running_stage() {
        let mut workflow = two_stage();
        workflow.begin_stage();
        workflow.validate_stage();
        workflow.begin_stage();
        workflow.fail(FailureReport {
            stage: "Implementation".to_string(),
            phase: None,
            agent_id: None,
            execution_id: None,
            error: "boom".to_string(),
            at: Utc::now(),
        });

        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.stages[0].status, StageStatus::Validated);
        assert_eq!(workflow.stages[1].status, StageStatus::Failed);
        assert_eq!(workflow.current_stage, 1);
        assert!(workflow.begin_stage().is_none());
        assert!(!workflow.complete());
    }
}
