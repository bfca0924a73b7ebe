//! # Swarm Orchestration
//!
//! Runs one task across a team of agents.
//!
//! ## Flow
//!
//! ```text
//! Task → AgentSelector (team) → CollaborationPlanner (phases)
//!      → PhaseExecutor (parallel | sequential) → ConflictResolver
//!      → PhaseValidator → Execution record → RunStore
//! ```

pub mod cancel;
pub mod conflict;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod task;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use conflict::{
    ArtifactOverlap, Claim, Conflict, ConflictKind, ConflictResolver, ConflictRule, Resolution,
    ResolutionStrategy, ResolvedConflict, VerdictMismatch,
};
pub use events::{
    ChannelEventSink, CoreEvent, CoreEventKind, EventSink, MemoryEventSink, NullEventSink,
    TracingEventSink,
};
pub use executor::{
    AgentOutcome, AgentResult, CollaborationEvent, CollaborationEventKind, PhaseExecution,
    PhaseExecutor, PhaseReport, PhaseRun,
};
pub use orchestrator::{
    Execution, ExecutionStatus, ExecutionSummary, OrchestrationError, Orchestrator, PhaseValidator,
    QualityGate,
};
pub use planner::{
    AgentAssignment, CollaborationPlan, CollaborationPlanner, Phase, PhaseMode, PlanConstraints,
};
pub use task::{QualityRequirements, Task, TimeConstraints};
