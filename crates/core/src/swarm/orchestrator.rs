//! # Orchestrator
//!
//! Runs one task end to end: select a team, plan the collaboration, then
//! execute the phases strictly in order. Phase N+1 starts only after phase N
//! has been recorded and, when it must validate, passed the validator.
//!
//! The execution record is persisted whether the run succeeds or not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::cancel::{cancel_pair, CancelHandle, CancelSignal};
use super::conflict::{ConflictRule, ResolvedConflict};
use super::events::{CoreEvent, CoreEventKind, EventSink};
use super::executor::{PhaseExecution, PhaseExecutor, PhaseRun};
use super::planner::{CollaborationPlanner, Phase, PlanConstraints};
use super::task::duration_ms;
use super::Task;
use crate::agents::{AgentOutput, AgentRegistry, AgentSelector, DefaultStrategy, SelectionStrategy};
use crate::config::OrchestratorConfig;
use crate::context::ProjectContext;
use crate::error::{ConductorError, Result};
use crate::state::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Figures emitted when an orchestration finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub phase_count: usize,
    pub duration_ms: u64,
    pub agent_count: usize,
    pub conflict_count: usize,
}

/// Record of one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Participating agent ids, team order
    pub agents: Vec<String>,
    pub phases: Vec<PhaseExecution>,
    #[serde(default)]
    pub conflicts: Vec<ResolvedConflict>,
    /// Output carried out of the last phase
    #[serde(default)]
    pub result: Option<AgentOutput>,
    #[serde(default)]
    pub summary: Option<ExecutionSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Execution {
    fn start(task: &Task) -> Self {
        Self {
            id: format!("exec-{}", uuid::Uuid::new_v4()),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            started_at: Utc::now(),
            completed_at: None,
            status: ExecutionStatus::Running,
            agents: Vec::new(),
            phases: Vec::new(),
            conflicts: Vec::new(),
            result: None,
            summary: None,
            error: None,
        }
    }

    pub fn escalations(&self) -> impl Iterator<Item = &ResolvedConflict> + '_ {
        self.conflicts.iter().filter(|c| c.resolution.is_escalated())
    }

    /// Every failed agent entry across all phases
    pub fn failed_agents(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.phases.iter().flat_map(|p| {
            p.failures()
                .map(move |r| (p.name.as_str(), r.agent_id.as_str()))
        })
    }
}

/// An orchestration that did not complete, with everything recorded so far
#[derive(Debug, Error)]
#[error("orchestration {id} failed: {source}", id = .execution.id)]
pub struct OrchestrationError {
    pub execution: Box<Execution>,
    #[source]
    pub source: ConductorError,
}

/// Gate applied to phases marked `requires_validation`
pub trait PhaseValidator: Send + Sync {
    /// `Err(reason)` rejects the phase
    fn validate(&self, phase: &Phase, record: &PhaseExecution, task: &Task) -> std::result::Result<(), String>;
}

/// Default validator: no agent errors, no escalated conflicts, and every
/// reported `coverage` / `review_score` meets the task's thresholds
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate;

impl QualityGate {
    fn check_metric(record: &PhaseExecution, metric: &str, min: Option<f64>) -> std::result::Result<(), String> {
        let Some(min) = min else {
            return Ok(());
        };

        let reported: Vec<(&str, f64)> = record
            .results
            .iter()
            .filter_map(|r| {
                let value = r.output()?.metrics.get(metric)?;
                Some((r.agent_id.as_str(), *value))
            })
            .collect();

        if reported.is_empty() {
            return Err(format!("no agent reported '{}' (required >= {})", metric, min));
        }
        match reported.iter().find(|(_, v)| *v < min) {
            Some((agent, value)) => Err(format!(
                "'{}' reported {} = {} below the required {}",
                agent, metric, value, min
            )),
            None => Ok(()),
        }
    }
}

impl PhaseValidator for QualityGate {
    fn validate(&self, _phase: &Phase, record: &PhaseExecution, task: &Task) -> std::result::Result<(), String> {
        if let Some(failed) = record.failures().next() {
            let reason = failed
                .error()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(format!("agent '{}' failed: {}", failed.agent_id, reason));
        }
        if let Some(escalated) = record.escalations().next() {
            return Err(format!(
                "conflict on '{}' was escalated",
                escalated.conflict.subject
            ));
        }
        Self::check_metric(record, "coverage", task.quality.min_coverage)?;
        Self::check_metric(record, "review_score", task.quality.min_review_score)?;
        Ok(())
    }
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    selector: AgentSelector,
    planner: CollaborationPlanner,
    constraints: PlanConstraints,
    executor: PhaseExecutor,
    validator: Arc<dyn PhaseValidator>,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventSink>,
    config: OrchestratorConfig,
    cancel: CancelHandle,
    signal: CancelSignal,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn RunStore>,
        events: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (cancel, signal) = cancel_pair();
        Self {
            registry,
            selector: AgentSelector::new(DefaultStrategy, config.default_agent_policy),
            planner: CollaborationPlanner::new(),
            constraints: PlanConstraints::default(),
            executor: PhaseExecutor::new(
                config.parallel_failure_policy,
                config.cancellation,
                Arc::clone(&events),
            ),
            validator: Arc::new(QualityGate),
            store,
            events,
            config,
            cancel,
            signal,
        }
    }

    pub fn with_strategy(mut self, strategy: impl SelectionStrategy + 'static) -> Self {
        self.selector = AgentSelector::new(strategy, self.config.default_agent_policy);
        self
    }

    pub fn with_validator(mut self, validator: impl PhaseValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_conflict_rules(mut self, rules: Vec<Arc<dyn ConflictRule>>) -> Self {
        self.executor = self.executor.with_rules(rules);
        self
    }

    pub fn with_constraints(mut self, constraints: PlanConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Handle that cancels every current and future run of this orchestrator
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[tracing::instrument(skip(self, task, context), fields(task_id = %task.id, task = %task.name))]
    pub async fn orchestrate_task(
        &self,
        task: &Task,
        context: Arc<ProjectContext>,
    ) -> std::result::Result<Execution, OrchestrationError> {
        let started = Instant::now();
        let mut execution = Execution::start(task);
        tracing::info!(execution_id = %execution.id, "Orchestration started");
        self.events.emit(
            CoreEvent::new(CoreEventKind::OrchestrationStarted, &execution.id).with_data(
                serde_json::json!({ "task_id": task.id, "task": task.name }),
            ),
        );

        let outcome = self.run_phases(task, context, &mut execution, started).await;

        execution.completed_at = Some(Utc::now());
        execution.summary = Some(ExecutionSummary {
            phase_count: execution.phases.len(),
            duration_ms: duration_ms(started.elapsed()),
            agent_count: execution.agents.len(),
            conflict_count: execution.conflicts.len(),
        });
        execution.status = match &outcome {
            Ok(()) => ExecutionStatus::Completed,
            Err(ConductorError::Cancelled) => ExecutionStatus::Cancelled,
            Err(_) => ExecutionStatus::Failed,
        };
        if let Err(e) = &outcome {
            execution.error = Some(e.to_string());
        }

        if let Err(e) = self.store.save_execution(&execution).await {
            tracing::warn!(execution_id = %execution.id, "Failed to persist execution: {:#}", e);
        }

        let kind = match execution.status {
            ExecutionStatus::Completed => CoreEventKind::OrchestrationCompleted,
            ExecutionStatus::Cancelled => CoreEventKind::OrchestrationCancelled,
            _ => CoreEventKind::OrchestrationFailed,
        };
        self.events.emit(
            CoreEvent::new(kind, &execution.id).with_data(serde_json::json!({
                "task_id": execution.task_id,
                "summary": execution.summary,
                "error": execution.error,
            })),
        );

        match outcome {
            Ok(()) => {
                tracing::info!(
                    execution_id = %execution.id,
                    phases = execution.phases.len(),
                    conflicts = execution.conflicts.len(),
                    "Orchestration completed"
                );
                Ok(execution)
            }
            Err(source) => {
                tracing::warn!(execution_id = %execution.id, error = %source, "Orchestration failed");
                Err(OrchestrationError {
                    execution: Box::new(execution),
                    source,
                })
            }
        }
    }

    fn agent_budget(&self, task: &Task, deadline: Option<(Instant, u64)>) -> Result<Duration> {
        let budget = task
            .time_constraints
            .agent_timeout()
            .unwrap_or_else(|| self.config.default_agent_timeout());

        match deadline {
            None => Ok(budget),
            Some((deadline, budget_ms)) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ConductorError::TimeoutExceeded {
                        scope: format!("task '{}'", task.name),
                        budget_ms,
                    });
                }
                Ok(budget.min(remaining))
            }
        }
    }

    async fn run_phases(
        &self,
        task: &Task,
        context: Arc<ProjectContext>,
        execution: &mut Execution,
        started: Instant,
    ) -> Result<()> {
        let team = self.selector.assemble_team(task, &self.registry)?;
        execution.agents = team.agent_ids();

        let plan = self.planner.create_plan(&team, task, &self.constraints);
        if let Some(unknown) = plan.agent_ids().find(|id| !team.contains(id)) {
            return Err(ConductorError::UnknownAgent(unknown.to_string()));
        }
        tracing::debug!(
            execution_id = %execution.id,
            phases = plan.phases.len(),
            team = ?execution.agents,
            "Collaboration planned"
        );

        let deadline = task
            .time_constraints
            .total_budget()
            .map(|budget| (started + budget, duration_ms(budget)));
        let mut carried: Option<(String, AgentOutput)> = None;

        for phase in &plan.phases {
            if self.signal.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }
            let agent_timeout = self.agent_budget(task, deadline)?;

            let report = self
                .executor
                .execute(
                    phase,
                    PhaseRun {
                        team: &team,
                        task,
                        execution_id: &execution.id,
                        project: Arc::clone(&context),
                        carried: carried.clone(),
                        agent_timeout,
                        cancel: &self.signal,
                    },
                )
                .await;

            if let Some((agent_id, output)) = report.record.carried_output() {
                carried = Some((agent_id.to_string(), output.clone()));
            }
            execution.conflicts.extend(report.record.conflicts.iter().cloned());
            let escalated = report.record.escalations().next().cloned();
            let verdict = if phase.requires_validation && report.error.is_none() {
                Some(self.validator.validate(phase, &report.record, task))
            } else {
                None
            };
            execution.phases.push(report.record);

            if let Some(error) = report.error {
                return Err(error);
            }
            if !phase.requires_validation {
                continue;
            }
            if let Some(resolved) = escalated {
                return Err(ConductorError::ConflictUnresolved {
                    conflict_id: resolved.conflict.id,
                    subject: resolved.conflict.subject,
                    rationale: resolved.resolution.rationale,
                });
            }
            if let Some(Err(reason)) = verdict {
                return Err(ConductorError::ValidationFailed {
                    phase: phase.name.clone(),
                    reason,
                });
            }
        }

        execution.result = carried.map(|(_, output)| output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::echo_agent;
    use crate::agents::{Agent, AgentTask, FnWork, Specialization, WorkContext};
    use crate::config::{CancellationPolicy, DefaultAgentPolicy};
    use crate::error::AgentError;
    use crate::state::MemoryRunStore;
    use crate::swarm::events::MemoryEventSink;
    use crate::swarm::{QualityRequirements, TimeConstraints};

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<MemoryRunStore>,
        events: Arc<MemoryEventSink>,
    }

    fn harness(agents: Vec<Arc<Agent>>, config: OrchestratorConfig) -> Harness {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(agent).unwrap();
        }
        let store = Arc::new(MemoryRunStore::new());
        let events = Arc::new(MemoryEventSink::new());
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::clone(&store) as Arc<dyn RunStore>,
            Arc::clone(&events) as Arc<dyn EventSink>,
            config,
        );
        Harness {
            orchestrator,
            store,
            events,
        }
    }

    fn metric_agent(id: &str, skill: Specialization, metric: &'static str, value: f64) -> Arc<Agent> {
        Arc::new(Agent::new(
            id,
            id,
            skill,
            FnWork::new(move |_t: AgentTask, _c: WorkContext| async move {
                Ok(AgentOutput::new("measured").with_metric(metric, value))
            }),
        ))
    }

    fn trio() -> Vec<Arc<Agent>> {
        vec![
            echo_agent("architect", Specialization::Architecture),
            echo_agent("coder", Specialization::Coding),
            echo_agent("reviewer", Specialization::Review),
        ]
    }

    #[tokio::test]
    async fn test_orchestrates_qa_task() {
        let h = harness(trio(), OrchestratorConfig::default());
        let task = Task::new("login", Specialization::Coding).with_qa(true);

        let execution = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.phases.len(), 3);
        assert_eq!(execution.agents, vec!["coder", "architect", "reviewer"]);
        assert!(execution.result.is_some());
        assert_eq!(execution.summary.as_ref().unwrap().phase_count, 3);

        let saved = h.store.executions();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, execution.id);
        assert!(h
            .events
            .kinds()
            .contains(&CoreEventKind::OrchestrationCompleted));
    }

    #[tokio::test]
    async fn test_missing_primary_fails_and_persists() {
        let h = harness(trio(), OrchestratorConfig::default());
        let task = Task::new("ship", Specialization::Deployment);

        let err = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();

        assert!(matches!(err.source, ConductorError::Selection { .. }));
        assert_eq!(err.execution.status, ExecutionStatus::Failed);
        assert!(err.execution.phases.is_empty());
        assert_eq!(h.store.executions().len(), 1);
    }

    #[tokio::test]
    async fn test_default_policy_falls_back() {
        let config = OrchestratorConfig {
            default_agent_policy: DefaultAgentPolicy::FirstRegistered,
            ..Default::default()
        };
        let h = harness(trio(), config);
        let task = Task::new("ship", Specialization::Deployment);

        let execution = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap();
        assert_eq!(execution.agents[0], "architect");
    }

    #[tokio::test]
    async fn test_validation_threshold_fails() {
        let agents = vec![
            echo_agent("coder", Specialization::Coding),
            metric_agent("tester", Specialization::Testing, "coverage", 0.5),
        ];
        let h = harness(agents, OrchestratorConfig::default());
        let task = Task::new("login", Specialization::Coding).with_quality(QualityRequirements {
            min_coverage: Some(0.8),
            ..Default::default()
        });

        let err = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();

        match &err.source {
            ConductorError::ValidationFailed { phase, reason } => {
                assert_eq!(phase, "Quality Review");
                assert!(reason.contains("coverage"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Every completed phase is preserved
        assert_eq!(err.execution.phases.len(), 3);
    }

    #[tokio::test]
    async fn test_validation_threshold_passes() {
        let agents = vec![
            echo_agent("coder", Specialization::Coding),
            metric_agent("tester", Specialization::Testing, "coverage", 0.9),
        ];
        let h = harness(agents, OrchestratorConfig::default());
        let task = Task::new("login", Specialization::Coding).with_quality(QualityRequirements {
            min_coverage: Some(0.8),
            ..Default::default()
        });

        let execution = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_escalated_conflict_on_validated_phase() {
        // Two equally ranked QA agents writing the same artifact differently
        let writer = |id: &'static str, body: &'static str| {
            Arc::new(Agent::new(
                id,
                id,
                Specialization::Review,
                FnWork::new(move |_t: AgentTask, _c: WorkContext| async move {
                    Ok(AgentOutput::new("notes").with_artifact("REVIEW.md", body))
                }),
            ))
        };
        let h = harness(
            vec![
                echo_agent("coder", Specialization::Coding),
                writer("reviewer-a", "looks fine"),
                writer("reviewer-b", "needs work"),
            ],
            OrchestratorConfig::default(),
        );
        // Custom strategy: both reviewers as QA
        struct BothReviewers;
        impl SelectionStrategy for BothReviewers {
            fn select_supporting(
                &self,
                _task: &Task,
                _candidates: &[Arc<Agent>],
                _primary: &Agent,
            ) -> Vec<Arc<Agent>> {
                Vec::new()
            }
            fn select_qa(
                &self,
                _task: &Task,
                candidates: &[Arc<Agent>],
                _primary: &Agent,
            ) -> Vec<Arc<Agent>> {
                candidates
                    .iter()
                    .filter(|a| a.specialization() == Specialization::Review)
                    .cloned()
                    .collect()
            }
        }
        let orchestrator = h.orchestrator.with_strategy(BothReviewers);
        let task = Task::new("login", Specialization::Coding).with_qa(true);

        let err = orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.source,
            ConductorError::ConflictUnresolved { ref subject, .. } if subject == "REVIEW.md"
        ));
        // Analysis escalated too, but only the validated phase is fatal
        assert_eq!(err.execution.escalations().count(), 2);
        assert_eq!(err.execution.phases.len(), 3);
    }

    #[tokio::test]
    async fn test_sequential_failure_names_agent() {
        let failing = Arc::new(Agent::new(
            "coder",
            "coder",
            Specialization::Coding,
            FnWork::new(|t: AgentTask, _c: WorkContext| async move {
                if t.phase == "Implementation" {
                    Err(anyhow::anyhow!("does not compile"))
                } else {
                    Ok(AgentOutput::new("analysed"))
                }
            }),
        ));
        let h = harness(
            vec![echo_agent("architect", Specialization::Architecture), failing],
            OrchestratorConfig::default(),
        );
        let task = Task::new("login", Specialization::Coding);

        let err = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();
        assert_eq!(err.source.agent_id(), Some("coder"));
        assert_eq!(err.source.phase(), Some("Implementation"));
        let implementation = err.execution.phases.last().unwrap();
        assert_eq!(implementation.results.len(), 2);
        assert_eq!(
            err.execution.failed_agents().collect::<Vec<_>>(),
            vec![("Implementation", "coder")]
        );
    }

    #[tokio::test]
    async fn test_total_budget_caps_agent_timeout() {
        let slow = Arc::new(Agent::new(
            "coder",
            "coder",
            Specialization::Coding,
            FnWork::new(|_t: AgentTask, _c: WorkContext| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(AgentOutput::new("late"))
            }),
        ));
        let h = harness(vec![slow], OrchestratorConfig::default());
        let task = Task::new("login", Specialization::Coding).with_time_constraints(TimeConstraints {
            agent_timeout_ms: None,
            total_budget_ms: Some(50),
        });

        let err = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();

        // The analysis agent times out within the task budget; the next phase
        // then finds the budget spent
        let analysis = &err.execution.phases[0];
        assert!(matches!(
            analysis.results[0].error(),
            Some(AgentError::TimedOut { .. })
        ));
        assert!(matches!(
            err.source,
            ConductorError::TimeoutExceeded { budget_ms: 50, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let config = OrchestratorConfig {
            cancellation: CancellationPolicy::Abort,
            ..Default::default()
        };
        let h = harness(trio(), config);
        h.orchestrator.cancel_handle().cancel();
        let task = Task::new("login", Specialization::Coding);

        let err = h
            .orchestrator
            .orchestrate_task(&task, Arc::new(ProjectContext::default()))
            .await
            .unwrap_err();
        assert!(matches!(err.source, ConductorError::Cancelled));
        assert_eq!(err.execution.status, ExecutionStatus::Cancelled);
        assert!(h
            .events
            .kinds()
            .contains(&CoreEventKind::OrchestrationCancelled));
    }
}
