//! # Errors
//!
//! Error taxonomy for the orchestration core. Agent-level failures are
//! contained in phase records as [`AgentError`]; everything that unwinds to the
//! orchestrator or workflow boundary is a [`ConductorError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::Specialization;

/// Result alias used across the core
pub type Result<T, E = ConductorError> = std::result::Result<T, E>;

/// Errors that unwind to the orchestrator / workflow boundary
#[derive(Debug, Error)]
pub enum ConductorError {
    /// An agent with this id is already registered
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// No eligible primary agent for the required skill
    #[error("no eligible primary agent for skill '{skill}'")]
    Selection { skill: Specialization },

    /// A plan assignment points at an agent outside the team
    #[error("plan references agent '{0}' which is not part of the team")]
    UnknownAgent(String),

    /// A phase aborted (sequential pipeline break or abort policy)
    #[error("phase '{phase}' aborted at agent '{agent_id}': {cause}")]
    PhaseExecution {
        phase: String,
        agent_id: String,
        cause: AgentError,
    },

    /// The resolver escalated a conflict on a phase that must validate
    #[error("conflict {conflict_id} on '{subject}' needs a human decision: {rationale}")]
    ConflictUnresolved {
        conflict_id: String,
        subject: String,
        rationale: String,
    },

    /// A phase's validation gate rejected its results
    #[error("validation of phase '{phase}' failed: {reason}")]
    ValidationFailed { phase: String, reason: String },

    /// The context provider could not produce a project snapshot
    #[error("project context unavailable: {0}")]
    ContextUnavailable(String),

    /// A pre-flight check failed; the workflow is aborted
    #[error("pre-flight check '{check}' failed for stage '{stage}': {reason}")]
    PreFlight {
        stage: String,
        check: String,
        reason: String,
    },

    /// A time budget ran out
    #[error("{scope} exceeded its time budget of {budget_ms}ms")]
    TimeoutExceeded { scope: String, budget_ms: u64 },

    /// The run was cancelled by its caller
    #[error("execution cancelled")]
    Cancelled,

    /// The persistence sink failed
    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl ConductorError {
    /// Agent responsible for the failure, when one is known
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::PhaseExecution { agent_id, .. } => Some(agent_id),
            Self::UnknownAgent(id) | Self::DuplicateAgent(id) => Some(id),
            _ => None,
        }
    }

    /// Phase responsible for the failure, when one is known
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::PhaseExecution { phase, .. } | Self::ValidationFailed { phase, .. } => {
                Some(phase)
            }
            _ => None,
        }
    }
}

/// Failure of a single agent invocation inside a phase
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentError {
    /// The unit of work returned an error
    #[error("{message}")]
    Failed { message: String },
    /// The unit of work ran past its budget
    #[error("timed out after {budget_ms}ms")]
    TimedOut { budget_ms: u64 },
    /// Another phase currently holds the agent
    #[error("agent is already running in another phase")]
    Busy,
    /// Cancelled before it finished
    #[error("cancelled before completion")]
    Cancelled,
    /// The task panicked or was torn down
    #[error("agent task aborted: {message}")]
    Panicked { message: String },
}

impl AgentError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_error_names_agent() {
        let err = ConductorError::PhaseExecution {
            phase: "Implementation".to_string(),
            agent_id: "coder".to_string(),
            cause: AgentError::failed("compile error"),
        };
        assert_eq!(err.agent_id(), Some("coder"));
        assert_eq!(err.phase(), Some("Implementation"));
        assert!(err.to_string().contains("compile error"));
    }

    #[test]
    fn test_agent_error_serialization() {
        let json = serde_json::to_string(&AgentError::TimedOut { budget_ms: 50 }).unwrap();
        assert!(json.contains("\"kind\":\"timed_out\""));
    }
}
