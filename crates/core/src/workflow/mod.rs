//! # Workflow Engine
//!
//! Drives a development intent through planned stages, delegating each
//! stage's task to the [`crate::swarm::Orchestrator`].

pub mod checks;
pub mod engine;
pub mod insight;
pub mod pipeline;
pub mod planner;

pub use checks::{
    default_post_flight, default_pre_flight, run_check, AgentsAvailable, AllAgentsSucceeded,
    BudgetRemaining, CheckContext, NoEscalatedConflicts, StageCheck,
};
pub use engine::{execution_ids, WorkflowEngine, WorkflowError};
pub use insight::Insight;
pub use pipeline::{
    FailureReport, PostFlightWarning, Stage, StageKind, StageStatus, Workflow, WorkflowStatus,
};
pub use planner::{IntentKind, StagePlanner, WorkflowOptions, CONTEXT_STAGE};
