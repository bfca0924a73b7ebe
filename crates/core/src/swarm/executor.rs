//! # Phase Executor
//!
//! Runs one phase of a collaboration plan.
//!
//! - **Parallel**: every assignment is spawned as its own tokio task and all
//!   of them are awaited; one failure never cuts the others short.
//! - **Sequential**: assignments run one at a time, each handing its output
//!   to the next. The first failure stops the pipeline.
//!
//! Every invocation runs under a time budget and holds an exclusive
//! [`AgentLease`](crate::agents::AgentLease) while it works.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::cancel::CancelSignal;
use super::conflict::{default_rules, ConflictResolver, ConflictRule, ResolvedConflict};
use super::events::{CoreEvent, CoreEventKind, EventSink};
use super::planner::{Phase, PhaseMode};
use super::task::duration_ms;
use super::Task;
use crate::agents::{Agent, AgentOutput, AgentTask, Team, WorkContext};
use crate::config::{CancellationPolicy, ParallelFailurePolicy};
use crate::context::ProjectContext;
use crate::error::{AgentError, ConductorError};

/// What one agent invocation produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success { output: AgentOutput },
    Failure { error: AgentError },
}

/// Per-agent entry of a phase record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AgentOutcome,
}

impl AgentResult {
    fn new(agent_id: &str, started_at: DateTime<Utc>, outcome: AgentOutcome) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    fn failure(agent_id: &str, started_at: DateTime<Utc>, error: AgentError) -> Self {
        Self::new(agent_id, started_at, AgentOutcome::Failure { error })
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AgentOutcome::Success { .. })
    }

    pub fn output(&self) -> Option<&AgentOutput> {
        match &self.outcome {
            AgentOutcome::Success { output } => Some(output),
            AgentOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&AgentError> {
        match &self.outcome {
            AgentOutcome::Failure { error } => Some(error),
            AgentOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationEventKind {
    /// One agent's output handed to the next
    SequentialHandoff,
    /// Parallel agents joined
    ParallelJoin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationEvent {
    pub kind: CollaborationEventKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl CollaborationEvent {
    fn new(kind: CollaborationEventKind, description: String) -> Self {
        Self {
            kind,
            description,
            timestamp: Utc::now(),
        }
    }
}

/// Record of one executed phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub name: String,
    pub mode: PhaseMode,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per agent that ran, in assignment order
    pub results: Vec<AgentResult>,
    #[serde(default)]
    pub conflicts: Vec<ResolvedConflict>,
    #[serde(default)]
    pub events: Vec<CollaborationEvent>,
}

impl PhaseExecution {
    fn start(phase: &Phase) -> Self {
        Self {
            name: phase.name.clone(),
            mode: phase.mode,
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            conflicts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &AgentResult> + '_ {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn escalations(&self) -> impl Iterator<Item = &ResolvedConflict> + '_ {
        self.conflicts.iter().filter(|c| c.resolution.is_escalated())
    }

    /// Last successful output, handed to the next phase
    pub fn carried_output(&self) -> Option<(&str, &AgentOutput)> {
        self.results
            .iter()
            .rev()
            .find_map(|r| r.output().map(|o| (r.agent_id.as_str(), o)))
    }
}

/// A phase record plus the error that stopped it, if any
#[derive(Debug)]
pub struct PhaseReport {
    pub record: PhaseExecution,
    pub error: Option<ConductorError>,
}

/// Inputs shared by every assignment of one phase run
#[derive(Debug, Clone)]
pub struct PhaseRun<'a> {
    pub team: &'a Team,
    pub task: &'a Task,
    pub execution_id: &'a str,
    pub project: Arc<ProjectContext>,
    /// Agent id and output carried over from the previous phase
    pub carried: Option<(String, AgentOutput)>,
    pub agent_timeout: Duration,
    pub cancel: &'a CancelSignal,
}

#[derive(Clone)]
pub struct PhaseExecutor {
    failure_policy: ParallelFailurePolicy,
    cancellation: CancellationPolicy,
    rules: Vec<Arc<dyn ConflictRule>>,
    resolver: ConflictResolver,
    events: Arc<dyn EventSink>,
}

impl PhaseExecutor {
    pub fn new(
        failure_policy: ParallelFailurePolicy,
        cancellation: CancellationPolicy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            failure_policy,
            cancellation,
            rules: default_rules(),
            resolver: ConflictResolver::new(),
            events,
        }
    }

    pub fn with_rules(mut self, rules: Vec<Arc<dyn ConflictRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub async fn execute(&self, phase: &Phase, run: PhaseRun<'_>) -> PhaseReport {
        let mut record = PhaseExecution::start(phase);

        let mut agents = Vec::with_capacity(phase.assignments.len());
        for assignment in &phase.assignments {
            match run.team.get(&assignment.agent_id) {
                Some(member) => agents.push(Arc::clone(&member.agent)),
                None => {
                    record.finished_at = Some(Utc::now());
                    return PhaseReport {
                        record,
                        error: Some(ConductorError::UnknownAgent(assignment.agent_id.clone())),
                    };
                }
            }
        }

        self.events.emit(
            CoreEvent::new(CoreEventKind::PhaseStarted, run.execution_id).with_data(
                serde_json::json!({
                    "phase": phase.name,
                    "mode": phase.mode,
                    "agents": phase.assignments.len(),
                }),
            ),
        );

        let error = match phase.mode {
            PhaseMode::Parallel => self.run_parallel(phase, &agents, &run, &mut record).await,
            PhaseMode::Sequential => self.run_sequential(phase, &agents, &run, &mut record).await,
        };

        self.detect_conflicts(phase, &run, &mut record);
        record.finished_at = Some(Utc::now());

        self.events.emit(
            CoreEvent::new(CoreEventKind::PhaseCompleted, run.execution_id).with_data(
                serde_json::json!({
                    "phase": record.name,
                    "succeeded": record.results.iter().filter(|r| r.is_success()).count(),
                    "failed": record.failures().count(),
                    "conflicts": record.conflicts.len(),
                }),
            ),
        );

        PhaseReport { record, error }
    }

    fn agent_task(run: &PhaseRun<'_>, phase: &Phase, subtask: &str) -> AgentTask {
        AgentTask {
            task_id: run.task.id.clone(),
            task_name: run.task.name.clone(),
            description: run.task.description.clone(),
            phase: phase.name.clone(),
            instruction: subtask.to_string(),
        }
    }

    fn spawn_agent(
        agent: Arc<Agent>,
        task: AgentTask,
        context: WorkContext,
        budget: Duration,
    ) -> JoinHandle<AgentResult> {
        tokio::spawn(async move {
            let started_at = Utc::now();
            let Some(mut lease) = agent.lease() else {
                return AgentResult::failure(agent.id(), started_at, AgentError::Busy);
            };

            let work = agent.work();
            let outcome = match tokio::time::timeout(budget, work.execute(&task, &context)).await {
                Ok(Ok(output)) => AgentOutcome::Success { output },
                Ok(Err(e)) => AgentOutcome::Failure {
                    error: AgentError::failed(format!("{:#}", e)),
                },
                Err(_) => AgentOutcome::Failure {
                    error: AgentError::TimedOut {
                        budget_ms: duration_ms(budget),
                    },
                },
            };

            if matches!(outcome, AgentOutcome::Failure { .. }) {
                lease.mark_failed();
            }
            AgentResult::new(agent.id(), started_at, outcome)
        })
    }

    /// Await one agent task, honouring cancellation.
    ///
    /// Once cancellation is observed, `deadline` is fixed to now + grace and
    /// shared by every remaining task of the phase.
    async fn await_agent(
        &self,
        agent_id: &str,
        started_at: DateTime<Utc>,
        mut handle: JoinHandle<AgentResult>,
        cancel: &CancelSignal,
        deadline: &mut Option<Instant>,
    ) -> AgentResult {
        if deadline.is_none() {
            tokio::select! {
                joined = &mut handle => return Self::joined(agent_id, started_at, joined),
                _ = cancel.cancelled() => {
                    *deadline = Some(Instant::now() + self.cancellation.grace());
                }
            }
        }

        let until = deadline.unwrap_or_else(Instant::now);
        match tokio::time::timeout_at(until, &mut handle).await {
            Ok(joined) => Self::joined(agent_id, started_at, joined),
            Err(_) => {
                handle.abort();
                tracing::warn!(agent_id, "Abandoned agent after cancellation");
                AgentResult::failure(agent_id, started_at, AgentError::Cancelled)
            }
        }
    }

    fn joined(
        agent_id: &str,
        started_at: DateTime<Utc>,
        joined: Result<AgentResult, tokio::task::JoinError>,
    ) -> AgentResult {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                AgentResult::failure(agent_id, started_at, AgentError::Cancelled)
            }
            Err(e) => AgentResult::failure(
                agent_id,
                started_at,
                AgentError::Panicked {
                    message: e.to_string(),
                },
            ),
        }
    }

    fn record_result(&self, run: &PhaseRun<'_>, phase: &Phase, result: &AgentResult) {
        match result.error() {
            None => self.events.emit(
                CoreEvent::new(CoreEventKind::AgentCompleted, run.execution_id).with_data(
                    serde_json::json!({ "phase": phase.name, "agent_id": result.agent_id }),
                ),
            ),
            Some(error) => {
                tracing::warn!(
                    phase = %phase.name,
                    agent_id = %result.agent_id,
                    error = %error,
                    "Agent failed"
                );
                self.events.emit(
                    CoreEvent::new(CoreEventKind::AgentFailed, run.execution_id).with_data(
                        serde_json::json!({
                            "phase": phase.name,
                            "agent_id": result.agent_id,
                            "error": error,
                        }),
                    ),
                );
            }
        }
    }

    async fn run_parallel(
        &self,
        phase: &Phase,
        agents: &[Arc<Agent>],
        run: &PhaseRun<'_>,
        record: &mut PhaseExecution,
    ) -> Option<ConductorError> {
        // SCATTER
        let mut handles = Vec::with_capacity(agents.len());
        for (assignment, agent) in phase.assignments.iter().zip(agents) {
            let (previous_agent, previous) = match (&run.carried, assignment.uses_previous_result) {
                (Some((id, output)), true) => (Some(id.clone()), Some(output.clone())),
                _ => (None, None),
            };
            let context = WorkContext {
                execution_id: run.execution_id.to_string(),
                project: Arc::clone(&run.project),
                previous,
                previous_agent,
            };
            let task = Self::agent_task(run, phase, &assignment.subtask);
            let handle = Self::spawn_agent(Arc::clone(agent), task, context, run.agent_timeout);
            handles.push((assignment.agent_id.as_str(), Utc::now(), handle));
        }

        // GATHER: wait for every task, in assignment order
        let mut deadline = None;
        for (agent_id, started_at, handle) in handles {
            let result = self
                .await_agent(agent_id, started_at, handle, run.cancel, &mut deadline)
                .await;
            self.record_result(run, phase, &result);
            record.results.push(result);
        }

        record.events.push(CollaborationEvent::new(
            CollaborationEventKind::ParallelJoin,
            format!("joined {} parallel agents", record.results.len()),
        ));

        if run.cancel.is_cancelled() {
            return Some(ConductorError::Cancelled);
        }

        let first_failure = record.failures().next()?;
        let failed = record.failures().count();
        match self.failure_policy {
            ParallelFailurePolicy::Continue => {
                tracing::warn!(
                    phase = %phase.name,
                    failed,
                    total = record.results.len(),
                    "Parallel phase had failures, continuing"
                );
                None
            }
            ParallelFailurePolicy::Abort => Some(ConductorError::PhaseExecution {
                phase: phase.name.clone(),
                agent_id: first_failure.agent_id.clone(),
                cause: first_failure
                    .error()
                    .cloned()
                    .unwrap_or_else(|| AgentError::failed("unknown failure")),
            }),
        }
    }

    async fn run_sequential(
        &self,
        phase: &Phase,
        agents: &[Arc<Agent>],
        run: &PhaseRun<'_>,
        record: &mut PhaseExecution,
    ) -> Option<ConductorError> {
        let mut previous = run.carried.clone();
        let mut deadline = None;

        for (assignment, agent) in phase.assignments.iter().zip(agents) {
            if run.cancel.is_cancelled() {
                return Some(ConductorError::Cancelled);
            }

            let (previous_agent, handed) = match (&previous, assignment.uses_previous_result) {
                (Some((id, output)), true) => (Some(id.clone()), Some(output.clone())),
                _ => (None, None),
            };
            if let Some(from) = &previous_agent {
                record.events.push(CollaborationEvent::new(
                    CollaborationEventKind::SequentialHandoff,
                    format!("sequential handoff from {} to {}", from, assignment.agent_id),
                ));
            }

            let context = WorkContext {
                execution_id: run.execution_id.to_string(),
                project: Arc::clone(&run.project),
                previous: handed,
                previous_agent,
            };
            let task = Self::agent_task(run, phase, &assignment.subtask);
            let started_at = Utc::now();
            let handle = Self::spawn_agent(Arc::clone(agent), task, context, run.agent_timeout);
            let result = self
                .await_agent(&assignment.agent_id, started_at, handle, run.cancel, &mut deadline)
                .await;
            self.record_result(run, phase, &result);

            match &result.outcome {
                AgentOutcome::Success { output } => {
                    previous = Some((assignment.agent_id.clone(), output.clone()));
                    record.results.push(result);
                }
                AgentOutcome::Failure { error } => {
                    let error = if run.cancel.is_cancelled() {
                        ConductorError::Cancelled
                    } else {
                        ConductorError::PhaseExecution {
                            phase: phase.name.clone(),
                            agent_id: assignment.agent_id.clone(),
                            cause: error.clone(),
                        }
                    };
                    record.results.push(result);
                    return Some(error);
                }
            }
        }
        None
    }

    fn detect_conflicts(&self, phase: &Phase, run: &PhaseRun<'_>, record: &mut PhaseExecution) {
        for rule in &self.rules {
            for conflict in rule.detect(phase, &record.results, run.team) {
                self.events.emit(
                    CoreEvent::new(CoreEventKind::ConflictDetected, run.execution_id).with_data(
                        serde_json::json!({
                            "rule": rule.name(),
                            "conflict_id": conflict.id,
                            "subject": conflict.subject,
                        }),
                    ),
                );

                let resolution = self.resolver.resolve(&conflict);
                self.events.emit(
                    CoreEvent::new(CoreEventKind::ConflictResolved, run.execution_id).with_data(
                        serde_json::json!({
                            "conflict_id": conflict.id,
                            "strategy": resolution.strategy,
                            "winner": resolution.winner,
                        }),
                    ),
                );
                record.conflicts.push(ResolvedConflict {
                    conflict,
                    resolution,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::echo_agent;
    use crate::agents::{FnWork, Specialization, TeamMember, TeamRole, Verdict};
    use crate::swarm::cancel::cancel_pair;
    use crate::swarm::conflict::ResolutionStrategy;
    use crate::swarm::events::MemoryEventSink;
    use crate::swarm::planner::AgentAssignment;

    fn failing_agent(id: &str, skill: Specialization) -> Arc<Agent> {
        Arc::new(Agent::new(
            id,
            id,
            skill,
            FnWork::new(|_task: AgentTask, _ctx: WorkContext| async move {
                Err(anyhow::anyhow!("exploded"))
            }),
        ))
    }

    fn artifact_agent(id: &str, skill: Specialization, content: &'static str) -> Arc<Agent> {
        Arc::new(Agent::new(
            id,
            id,
            skill,
            FnWork::new(move |_task: AgentTask, _ctx: WorkContext| async move {
                Ok(AgentOutput::new("wrote lib").with_artifact("src/lib.rs", content))
            }),
        ))
    }

    fn slow_agent(id: &str, millis: u64) -> Arc<Agent> {
        Arc::new(Agent::new(
            id,
            id,
            Specialization::Coding,
            FnWork::new(move |_task: AgentTask, _ctx: WorkContext| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(AgentOutput::new("slow"))
            }),
        ))
    }

    fn team(agents: &[Arc<Agent>]) -> Team {
        Team::new(
            agents
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    let role = if i == 0 {
                        TeamRole::Primary
                    } else {
                        TeamRole::Supporting
                    };
                    TeamMember::new(Arc::clone(a), role)
                })
                .collect(),
        )
    }

    fn phase(name: &str, mode: PhaseMode, ids: &[&str], chained: bool) -> Phase {
        Phase {
            name: name.to_string(),
            mode,
            assignments: ids
                .iter()
                .enumerate()
                .map(|(i, id)| AgentAssignment {
                    agent_id: id.to_string(),
                    subtask: format!("step {}", i),
                    uses_previous_result: chained && i > 0,
                })
                .collect(),
            requires_validation: false,
        }
    }

    fn executor(policy: ParallelFailurePolicy) -> PhaseExecutor {
        PhaseExecutor::new(
            policy,
            CancellationPolicy::default(),
            Arc::new(MemoryEventSink::new()),
        )
    }

    async fn run_phase(
        executor: &PhaseExecutor,
        phase: &Phase,
        team: &Team,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> PhaseReport {
        let task = Task::new("t", Specialization::Coding);
        executor
            .execute(
                phase,
                PhaseRun {
                    team,
                    task: &task,
                    execution_id: "exec-test",
                    project: Arc::new(ProjectContext::default()),
                    carried: None,
                    agent_timeout: timeout,
                    cancel,
                },
            )
            .await
    }

    #[tokio::test]
    async fn test_parallel_waits_for_all() {
        let agents = vec![
            echo_agent("a", Specialization::Coding),
            failing_agent("b", Specialization::Testing),
            echo_agent("c", Specialization::Review),
            failing_agent("d", Specialization::Security),
        ];
        let team = team(&agents);
        let phase = phase("Analysis", PhaseMode::Parallel, &["a", "b", "c", "d"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.results.len(), 4);
        assert_eq!(report.record.failures().count(), 2);
        assert!(report.error.is_none());
        // Agents released according to their outcome
        assert_eq!(agents[0].state(), crate::agents::AgentState::Idle);
        assert_eq!(agents[1].state(), crate::agents::AgentState::Failed);
    }

    #[tokio::test]
    async fn test_parallel_abort_policy() {
        let agents = vec![
            echo_agent("a", Specialization::Coding),
            failing_agent("b", Specialization::Testing),
        ];
        let team = team(&agents);
        let phase = phase("Analysis", PhaseMode::Parallel, &["a", "b"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Abort),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.results.len(), 2);
        let err = report.error.unwrap();
        assert_eq!(err.agent_id(), Some("b"));
    }

    #[tokio::test]
    async fn test_sequential_halts_at_failure() {
        let agents = vec![
            echo_agent("architect", Specialization::Architecture),
            failing_agent("coder", Specialization::Coding),
            echo_agent("refactorer", Specialization::Refactoring),
        ];
        let team = team(&agents);
        let phase = phase(
            "Implementation",
            PhaseMode::Sequential,
            &["architect", "coder", "refactorer"],
            true,
        );
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.results.len(), 2);
        match report.error {
            Some(ConductorError::PhaseExecution { agent_id, cause, .. }) => {
                assert_eq!(agent_id, "coder");
                assert_eq!(cause, AgentError::failed("exploded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            report.record.events[0].description,
            "sequential handoff from architect to coder"
        );
    }

    #[tokio::test]
    async fn test_sequential_passes_previous_output() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let captured = Arc::clone(&seen);
        let reader = Arc::new(Agent::new(
            "reader",
            "reader",
            Specialization::Review,
            FnWork::new(move |_task: AgentTask, ctx: WorkContext| {
                let captured = Arc::clone(&captured);
                async move {
                    *captured.lock().unwrap() = ctx.previous.map(|p| p.summary);
                    Ok(AgentOutput::new("read"))
                }
            }),
        ));
        let agents = vec![echo_agent("writer", Specialization::Coding), reader];
        let team = team(&agents);
        let phase = phase("Implementation", PhaseMode::Sequential, &["writer", "reader"], true);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert!(report.error.is_none());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("step 0"));
        assert_eq!(report.record.carried_output().unwrap().0, "reader");
    }

    #[tokio::test]
    async fn test_timeout_recorded() {
        let agents = vec![slow_agent("sleepy", 5_000)];
        let team = team(&agents);
        let phase = phase("Implementation", PhaseMode::Sequential, &["sleepy"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_millis(20),
            &signal,
        )
        .await;

        assert_eq!(
            report.record.results[0].error(),
            Some(&AgentError::TimedOut { budget_ms: 20 })
        );
        assert!(matches!(
            report.error,
            Some(ConductorError::PhaseExecution { .. })
        ));
    }

    #[tokio::test]
    async fn test_busy_agent_rejected() {
        let agent = echo_agent("coder", Specialization::Coding);
        let _held = agent.lease().unwrap();
        let team = team(&[Arc::clone(&agent)]);
        let phase = phase("Implementation", PhaseMode::Sequential, &["coder"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(1),
            &signal,
        )
        .await;

        assert_eq!(report.record.results[0].error(), Some(&AgentError::Busy));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_after_grace() {
        let agents = vec![slow_agent("sleepy", 10_000)];
        let team = team(&agents);
        let phase = phase("Analysis", PhaseMode::Parallel, &["sleepy"], false);
        let (handle, signal) = cancel_pair();
        let executor = PhaseExecutor::new(
            ParallelFailurePolicy::Continue,
            CancellationPolicy::Drain { grace_ms: 10 },
            Arc::new(MemoryEventSink::new()),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let report = run_phase(&executor, &phase, &team, Duration::from_secs(30), &signal).await;
        canceller.await.unwrap();

        assert_eq!(report.record.results[0].error(), Some(&AgentError::Cancelled));
        assert!(matches!(report.error, Some(ConductorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_drain_lets_agent_finish_within_grace() {
        let agents = vec![slow_agent("steady", 80)];
        let team = team(&agents);
        let phase = phase("Analysis", PhaseMode::Parallel, &["steady"], false);
        let (handle, signal) = cancel_pair();
        let executor = PhaseExecutor::new(
            ParallelFailurePolicy::Continue,
            CancellationPolicy::Drain { grace_ms: 5_000 },
            Arc::new(MemoryEventSink::new()),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let report = run_phase(&executor, &phase, &team, Duration::from_secs(30), &signal).await;
        canceller.await.unwrap();

        assert!(report.record.results[0].is_success());
        assert!(matches!(report.error, Some(ConductorError::Cancelled)));
        assert_eq!(agents[0].state(), crate::agents::AgentState::Idle);
    }

    #[tokio::test]
    async fn test_abort_policy_abandons_immediately() {
        let agents = vec![slow_agent("sleepy", 10_000)];
        let team = team(&agents);
        let phase = phase("Implementation", PhaseMode::Sequential, &["sleepy"], false);
        let (handle, signal) = cancel_pair();
        let executor = PhaseExecutor::new(
            ParallelFailurePolicy::Continue,
            CancellationPolicy::Abort,
            Arc::new(MemoryEventSink::new()),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let started = Instant::now();
        let report = run_phase(&executor, &phase, &team, Duration::from_secs(30), &signal).await;
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.record.results.len(), 1);
        assert_eq!(report.record.results[0].error(), Some(&AgentError::Cancelled));
        assert!(matches!(report.error, Some(ConductorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_parallel_artifact_overlap_resolved() {
        let agents = vec![
            artifact_agent("coder", Specialization::Coding, "fn a() {}"),
            artifact_agent("refactorer", Specialization::Refactoring, "fn b() {}"),
        ];
        let team = team(&agents);
        let phase = phase("Analysis", PhaseMode::Parallel, &["coder", "refactorer"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.conflicts.len(), 1);
        let resolved = &report.record.conflicts[0];
        assert_eq!(resolved.conflict.subject, "src/lib.rs");
        assert_eq!(resolved.resolution.strategy, ResolutionStrategy::PriorityOverride);
        assert_eq!(resolved.resolution.winner.as_deref(), Some("coder"));
    }

    #[tokio::test]
    async fn test_sequential_refinement_is_not_a_conflict() {
        let agents = vec![
            artifact_agent("coder", Specialization::Coding, "v1"),
            artifact_agent("refactorer", Specialization::Refactoring, "v2"),
        ];
        let team = team(&agents);
        let phase = phase("Implementation", PhaseMode::Sequential, &["coder", "refactorer"], true);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert!(report.error.is_none());
        assert!(report.record.conflicts.is_empty());
        let (agent_id, output) = report.record.carried_output().unwrap();
        assert_eq!(agent_id, "refactorer");
        assert_eq!(output.artifacts.get("src/lib.rs").map(String::as_str), Some("v2"));
    }

    #[tokio::test]
    async fn test_unchained_sequential_overlap_conflicts() {
        let agents = vec![
            artifact_agent("coder", Specialization::Coding, "v1"),
            artifact_agent("refactorer", Specialization::Refactoring, "v2"),
        ];
        let team = team(&agents);
        let phase = phase("Implementation", PhaseMode::Sequential, &["coder", "refactorer"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.conflicts.len(), 1);
        assert_eq!(report.record.conflicts[0].conflict.claims.len(), 2);
    }

    #[tokio::test]
    async fn test_verdict_mismatch_detected() {
        let approve = Arc::new(Agent::new(
            "reviewer",
            "reviewer",
            Specialization::Review,
            FnWork::new(|_t: AgentTask, _c: WorkContext| async move {
                Ok(AgentOutput::new("lgtm").with_verdict(Verdict::Approve))
            }),
        ));
        let reject = Arc::new(Agent::new(
            "tester",
            "tester",
            Specialization::Testing,
            FnWork::new(|_t: AgentTask, _c: WorkContext| async move {
                Ok(AgentOutput::new("broken").with_verdict(Verdict::Reject))
            }),
        ));
        let coder = echo_agent("coder", Specialization::Coding);
        let team = Team::new(vec![
            TeamMember::new(coder, TeamRole::Primary),
            TeamMember::new(approve, TeamRole::QualityAssurance),
            TeamMember::new(reject, TeamRole::QualityAssurance),
        ]);
        let phase = phase("Quality Review", PhaseMode::Parallel, &["reviewer", "tester"], false);
        let (_handle, signal) = cancel_pair();

        let report = run_phase(
            &executor(ParallelFailurePolicy::Continue),
            &phase,
            &team,
            Duration::from_secs(5),
            &signal,
        )
        .await;

        assert_eq!(report.record.conflicts.len(), 1);
        assert_eq!(
            report.record.conflicts[0].resolution.winner.as_deref(),
            Some("tester")
        );
    }
}
