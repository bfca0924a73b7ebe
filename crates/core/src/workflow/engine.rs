//! # Workflow Engine
//!
//! Top-level driver. One call to [`WorkflowEngine::start_workflow`]:
//!
//! 1. detects the project context (once)
//! 2. plans the stages for the intent
//! 3. per stage: pre-flight → orchestrate (when the stage carries a task)
//!    → post-flight → insight → advance
//! 4. persists the workflow and emits a summary
//!
//! A failed pre-flight check or a failed orchestration stops the workflow;
//! post-flight failures only add warnings.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::checks::{
    default_post_flight, default_pre_flight, run_check, CheckContext, StageCheck,
};
use super::insight::Insight;
use super::pipeline::{FailureReport, PostFlightWarning, Stage, StageStatus, Workflow};
use super::planner::{IntentKind, StagePlanner, WorkflowOptions, CONTEXT_STAGE};
use crate::config::WorkflowConfig;
use crate::context::{ContextProvider, ProjectContext};
use crate::error::{ConductorError, Result};
use crate::state::RunStore;
use crate::swarm::task::duration_ms;
use crate::swarm::{CancelHandle, CoreEvent, CoreEventKind, EventSink, Orchestrator, Task};

/// A workflow that did not complete, as far as it got
#[derive(Debug, Error)]
#[error("workflow {id} failed: {source}", id = .workflow.id)]
pub struct WorkflowError {
    pub workflow: Box<Workflow>,
    #[source]
    pub source: ConductorError,
}

pub struct WorkflowEngine {
    orchestrator: Arc<Orchestrator>,
    context: Arc<dyn ContextProvider>,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
    planner: StagePlanner,
    pre_flight: Vec<Arc<dyn StageCheck>>,
    post_flight: Vec<Arc<dyn StageCheck>>,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        context: Arc<dyn ContextProvider>,
        store: Arc<dyn RunStore>,
        events: Arc<dyn EventSink>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            orchestrator,
            context,
            store,
            events,
            planner: StagePlanner::new(),
            pre_flight: default_pre_flight(),
            post_flight: default_post_flight(),
            config,
        }
    }

    pub fn with_pre_flight(mut self, check: impl StageCheck + 'static) -> Self {
        self.pre_flight.push(Arc::new(check));
        self
    }

    pub fn with_post_flight(mut self, check: impl StageCheck + 'static) -> Self {
        self.post_flight.push(Arc::new(check));
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Cancels the running orchestration and stops further stages
    pub fn cancel_handle(&self) -> CancelHandle {
        self.orchestrator.cancel_handle()
    }

    #[tracing::instrument(skip(self, options), fields(intent = %intent))]
    pub async fn start_workflow(
        &self,
        intent: &str,
        options: WorkflowOptions,
    ) -> std::result::Result<Workflow, WorkflowError> {
        let started = Instant::now();
        let kind = options
            .intent_kind
            .unwrap_or_else(|| IntentKind::classify(intent));
        let mut workflow = Workflow::new(intent, kind);

        tracing::info!(workflow_id = %workflow.id, kind = kind.as_str(), "Workflow started");
        self.events.emit(
            CoreEvent::new(CoreEventKind::WorkflowStarted, &workflow.id)
                .with_data(serde_json::json!({ "intent": intent, "kind": kind })),
        );

        let context = match self.context.detect().await {
            Ok(context) => context,
            Err(e) => {
                let source = ConductorError::ContextUnavailable(format!("{:#}", e));
                return Err(self.abort(workflow, source).await);
            }
        };

        let stages = self
            .planner
            .plan(&workflow.id, intent, kind, &context, &options);
        tracing::debug!(
            workflow_id = %workflow.id,
            stages = ?stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Stages planned"
        );
        workflow.activate(context, stages);

        let context = Arc::new(workflow.context.clone());
        let deadline = options
            .budget_secs
            .or(self.config.workflow_budget_secs)
            .map(|secs| started + Duration::from_secs(secs));

        loop {
            if self.orchestrator.cancel_handle().is_cancelled() {
                return Err(self.abort(workflow, ConductorError::Cancelled).await);
            }
            let Some(stage) = workflow.begin_stage().cloned() else {
                break;
            };
            if let Err(source) = self.run_stage(&mut workflow, stage, &context, deadline).await {
                return Err(self.abort(workflow, source).await);
            }
        }

        let completed = workflow.complete();
        if !completed {
            tracing::warn!(
                workflow_id = %workflow.id,
                current_stage = workflow.current_stage,
                stages = workflow.stages.len(),
                "Workflow refused completion"
            );
        }
        debug_assert!(completed, "stage loop ended with unfinished stages");
        if let Err(e) = self.store.save_workflow(&workflow).await {
            return Err(WorkflowError {
                workflow: Box::new(workflow),
                source: ConductorError::Persistence(e),
            });
        }

        tracing::info!(
            workflow_id = %workflow.id,
            stages = workflow.stages.len(),
            warnings = workflow.warnings.len(),
            "Workflow completed"
        );
        self.events.emit(
            CoreEvent::new(CoreEventKind::WorkflowCompleted, &workflow.id).with_data(
                serde_json::json!({
                    "stages": workflow.stages.len(),
                    "insights": workflow.insights.len(),
                    "warnings": workflow.warnings.len(),
                    "duration_ms": duration_ms(started.elapsed()),
                }),
            ),
        );
        Ok(workflow)
    }

    async fn run_stage(
        &self,
        workflow: &mut Workflow,
        stage: Stage,
        context: &Arc<ProjectContext>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let stage_started = Instant::now();
        let timeout = self.config.check_timeout();
        let registry = self.orchestrator.registry().as_ref();
        let default_policy = self.orchestrator.config().default_agent_policy;

        tracing::info!(workflow_id = %workflow.id, stage = %stage.name, "Stage started");
        self.events.emit(
            CoreEvent::new(CoreEventKind::StageStarted, &workflow.id).with_data(
                serde_json::json!({ "stage": stage.name, "index": workflow.current_stage }),
            ),
        );

        // Pre-flight
        {
            let ctx = CheckContext {
                workflow: &*workflow,
                stage: &stage,
                registry,
                default_policy,
                deadline,
                execution: None,
            };
            for check in &self.pre_flight {
                if let Err(reason) = run_check(check.as_ref(), &ctx, timeout).await {
                    return Err(ConductorError::PreFlight {
                        stage: stage.name.clone(),
                        check: check.name().to_string(),
                        reason,
                    });
                }
            }
        }

        // Execute
        let execution = match &stage.task {
            None => None,
            Some(task) => {
                let task = Self::fit_to_deadline(task, deadline);
                match self
                    .orchestrator
                    .orchestrate_task(&task, Arc::clone(context))
                    .await
                {
                    Ok(execution) => {
                        workflow.attach_execution(&execution.id);
                        Some(execution)
                    }
                    Err(err) => {
                        workflow.attach_execution(&err.execution.id);
                        let insight = Insight::from_execution(
                            &workflow.id,
                            &err.execution,
                            stage_started.elapsed(),
                        );
                        self.record_insight(workflow, insight).await;
                        return Err(err.source);
                    }
                }
            }
        };

        // Post-flight
        let mut warnings = Vec::new();
        {
            let ctx = CheckContext {
                workflow: &*workflow,
                stage: &stage,
                registry,
                default_policy,
                deadline,
                execution: execution.as_ref(),
            };
            for check in &self.post_flight {
                if let Err(message) = run_check(check.as_ref(), &ctx, timeout).await {
                    warnings.push(PostFlightWarning {
                        stage: stage.name.clone(),
                        check: check.name().to_string(),
                        message,
                        at: Utc::now(),
                    });
                }
            }
        }
        for warning in warnings {
            tracing::warn!(
                workflow_id = %workflow.id,
                stage = %warning.stage,
                check = %warning.check,
                "Post-flight check failed: {}",
                warning.message
            );
            self.events.emit(
                CoreEvent::new(CoreEventKind::PostFlightWarning, &workflow.id)
                    .with_data(serde_json::to_value(&warning).unwrap_or_default()),
            );
            workflow.warnings.push(warning);
        }

        let insight = match &execution {
            Some(execution) => {
                Insight::from_execution(&workflow.id, execution, stage_started.elapsed())
            }
            None => Insight::from_context(&workflow.id, &stage.name, &workflow.context),
        };
        self.record_insight(workflow, insight).await;

        workflow.validate_stage();
        tracing::info!(workflow_id = %workflow.id, stage = %stage.name, "Stage validated");
        self.events.emit(
            CoreEvent::new(CoreEventKind::StageCompleted, &workflow.id).with_data(
                serde_json::json!({
                    "stage": stage.name,
                    "execution_id": execution.as_ref().map(|e| e.id.as_str()),
                    "duration_ms": duration_ms(stage_started.elapsed()),
                }),
            ),
        );
        Ok(())
    }

    /// Cap the task's own budget by what is left of the workflow's
    fn fit_to_deadline(task: &Task, deadline: Option<Instant>) -> Task {
        let mut task = task.clone();
        if let Some(deadline) = deadline {
            let remaining = duration_ms(deadline.saturating_duration_since(Instant::now()));
            let budget = task
                .time_constraints
                .total_budget_ms
                .map_or(remaining, |ms| ms.min(remaining));
            task.time_constraints.total_budget_ms = Some(budget);
        }
        task
    }

    async fn record_insight(&self, workflow: &mut Workflow, insight: Insight) {
        if let Err(e) = self.store.append_insight(&insight).await {
            tracing::warn!(workflow_id = %workflow.id, "Failed to persist insight: {:#}", e);
        }
        self.events.emit(
            CoreEvent::new(CoreEventKind::InsightRecorded, &workflow.id).with_data(
                serde_json::json!({ "insight_id": insight.id, "source": insight.source }),
            ),
        );
        workflow.insights.push(insight);
    }

    async fn abort(&self, mut workflow: Workflow, source: ConductorError) -> WorkflowError {
        let (stage, execution_id, running) = match workflow.current() {
            Some(stage) => (
                stage.name.clone(),
                stage.execution_id.clone(),
                stage.status == StageStatus::Running,
            ),
            None => (CONTEXT_STAGE.to_string(), None, false),
        };

        workflow.fail(FailureReport {
            stage: stage.clone(),
            phase: source.phase().map(str::to_string),
            agent_id: source.agent_id().map(str::to_string),
            execution_id,
            error: source.to_string(),
            at: Utc::now(),
        });
        tracing::warn!(workflow_id = %workflow.id, stage = %stage, error = %source, "Workflow failed");

        if running {
            self.events.emit(
                CoreEvent::new(CoreEventKind::StageFailed, &workflow.id)
                    .with_data(serde_json::json!({ "stage": stage, "error": source.to_string() })),
            );
        }
        if let Err(e) = self.store.save_workflow(&workflow).await {
            tracing::warn!(workflow_id = %workflow.id, "Failed to persist workflow: {:#}", e);
        }
        self.events.emit(
            CoreEvent::new(CoreEventKind::WorkflowFailed, &workflow.id)
                .with_data(serde_json::json!({ "failure": workflow.failure })),
        );

        WorkflowError {
            workflow: Box::new(workflow),
            source,
        }
    }
}

/// Ids of every execution a workflow ran, in stage order
pub fn execution_ids(workflow: &Workflow) -> impl Iterator<Item = &str> + '_ {
    workflow
        .stages
        .iter()
        .filter_map(|s| s.execution_id.as_deref())
}
