//! # Agents
//!
//! Specialized workers and the pluggable unit of work they run.
//!
//! ## Architecture
//!
//! ```text
//! AgentRegistry (read-only after init)
//!   └── Agent (id, specialization, capabilities, lifecycle)
//!         └── AgentWork (opaque execute(task, context))
//! ```
//!
//! Specialization is metadata used by the selector; behaviour lives entirely
//! in the agent's [`AgentWork`].

pub mod definitions;
pub mod llm;
pub mod registry;
pub mod selector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::ProjectContext;

pub use definitions::{create_roster, default_roster};
pub use llm::LlmWork;
pub use registry::AgentRegistry;
pub use selector::{AgentSelector, DefaultStrategy, SelectionStrategy, Team, TeamMember, TeamRole};

/// Specialization tag of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Architecture,
    Coding,
    Review,
    Testing,
    Security,
    Performance,
    Documentation,
    Deployment,
    Monitoring,
    Refactoring,
}

impl Specialization {
    pub fn all() -> [Specialization; 10] {
        [
            Self::Architecture,
            Self::Coding,
            Self::Review,
            Self::Testing,
            Self::Security,
            Self::Performance,
            Self::Documentation,
            Self::Deployment,
            Self::Monitoring,
            Self::Refactoring,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Coding => "coding",
            Self::Review => "review",
            Self::Testing => "testing",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Documentation => "documentation",
            Self::Deployment => "deployment",
            Self::Monitoring => "monitoring",
            Self::Refactoring => "refactoring",
        }
    }

    /// Position in an implementation pipeline (design before code before polish)
    pub fn pipeline_rank(&self) -> u8 {
        match self {
            Self::Architecture => 0,
            Self::Coding => 1,
            Self::Refactoring => 2,
            Self::Performance => 3,
            Self::Security => 4,
            Self::Documentation => 5,
            Self::Testing => 6,
            Self::Review => 7,
            Self::Deployment => 8,
            Self::Monitoring => 9,
        }
    }

    /// Weight used when two agents claim the same artifact (higher wins)
    pub fn conflict_priority(&self) -> u8 {
        match self {
            Self::Architecture => 9,
            Self::Security => 8,
            Self::Coding => 7,
            Self::Refactoring => 6,
            Self::Performance => 5,
            Self::Testing => 4,
            Self::Review => 3,
            Self::Documentation => 2,
            Self::Deployment => 1,
            Self::Monitoring => 0,
        }
    }

    /// Specializations that gate quality rather than produce it
    pub fn is_quality_gate(&self) -> bool {
        matches!(self, Self::Review | Self::Testing | Self::Security)
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Failed,
}

impl AgentState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Failed => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Review verdict reported by quality agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    RequestChanges,
    Reject,
}

/// The subtask an agent is asked to perform within one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub task_name: String,
    /// Task description supplied by the caller
    pub description: String,
    pub phase: String,
    /// Instruction for this agent in this phase
    pub instruction: String,
}

/// Context handed to a unit of work
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub execution_id: String,
    pub project: Arc<ProjectContext>,
    /// Output of the agent that ran immediately before (pipeline handoff)
    pub previous: Option<AgentOutput>,
    pub previous_agent: Option<String>,
}

/// Result of a successful unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub summary: String,
    /// Named artifacts the agent proposes to create or modify (name -> content)
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    /// Numeric measurements (e.g. `coverage`, `review_score`)
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
}

impl AgentOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.artifacts.insert(name.into(), content.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

/// The pluggable unit of work behind an agent
///
/// Implementations either run to completion or return an error; partial
/// results are not modeled.
#[async_trait]
pub trait AgentWork: Send + Sync {
    async fn execute(&self, task: &AgentTask, context: &WorkContext) -> anyhow::Result<AgentOutput>;
}

/// Closure-backed [`AgentWork`]
pub struct FnWork<F> {
    f: F,
}

impl<F> FnWork<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(AgentTask, WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<AgentOutput>> + Send + 'static,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> AgentWork for FnWork<F>
where
    F: Fn(AgentTask, WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<AgentOutput>> + Send + 'static,
{
    async fn execute(&self, task: &AgentTask, context: &WorkContext) -> anyhow::Result<AgentOutput> {
        (self.f)(task.clone(), context.clone()).await
    }
}

/// A registered worker
pub struct Agent {
    id: String,
    name: String,
    specialization: Specialization,
    capabilities: BTreeSet<String>,
    state: AtomicU8,
    work: Arc<dyn AgentWork>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("specialization", &self.specialization)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state())
            .finish()
    }
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        specialization: Specialization,
        work: impl AgentWork + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            specialization,
            capabilities: BTreeSet::new(),
            state: AtomicU8::new(AgentState::Idle.to_u8()),
            work: Arc::new(work),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn work(&self) -> Arc<dyn AgentWork> {
        Arc::clone(&self.work)
    }

    /// Take exclusive hold of the agent for one invocation.
    ///
    /// Returns `None` while another phase holds it.
    pub fn lease(self: &Arc<Self>) -> Option<AgentLease> {
        let running = AgentState::Running.to_u8();
        for from in [AgentState::Idle, AgentState::Failed] {
            if self
                .state
                .compare_exchange(from.to_u8(), running, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(AgentLease {
                    agent: Arc::clone(self),
                    failed: false,
                });
            }
        }
        None
    }
}

/// Exclusive hold on a running agent; releases on drop
pub struct AgentLease {
    agent: Arc<Agent>,
    failed: bool,
}

impl AgentLease {
    /// Release into `failed` instead of `idle`
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        let next = if self.failed {
            AgentState::Failed
        } else {
            AgentState::Idle
        };
        self.agent.state.store(next.to_u8(), Ordering::Release);
    }
}
