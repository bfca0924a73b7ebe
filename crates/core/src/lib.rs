//! # Conductor Core
//!
//! Workflow and agent orchestration: turns a development intent into stages,
//! staffs each stage with a team of specialized agents, runs their work in
//! parallel or as a pipeline, resolves conflicts between them and records
//! what happened.
//!
//! ## Architecture
//!
//! - `agents/` - Agent registry, team selection, LLM-backed agent work
//! - `swarm/` - Collaboration planning, phase execution, conflicts, orchestrator
//! - `workflow/` - Stage planning, pre/post-flight checks, workflow engine
//! - `state/` - SQLite and in-memory run stores
//! - `context` - Project context providers
//! - `config` / `models` - Runtime settings and LLM provider selection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conductor_core::{agents, config::ConductorConfig, context, state, swarm, workflow};
//!
//! let config = ConductorConfig::default();
//! let registry = Arc::new(agents::create_roster(&config.models)?);
//! let store: Arc<dyn state::RunStore> = Arc::new(state::SqliteRunStore::open_at(config.database_path())?);
//! let events: Arc<dyn swarm::EventSink> = Arc::new(swarm::TracingEventSink);
//! let orchestrator = swarm::Orchestrator::new(registry, store.clone(), events.clone(), config.orchestrator.clone());
//! let engine = workflow::WorkflowEngine::new(
//!     Arc::new(orchestrator),
//!     Arc::new(context::ManifestContextProvider::new(".")),
//!     store,
//!     events,
//!     config.workflow.clone(),
//! );
//! let workflow = engine.start_workflow("Add OAuth login", Default::default()).await?;
//! ```

pub mod agents;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod state;
pub mod swarm;
pub mod workflow;

pub use config::ConductorConfig;
pub use error::{AgentError, ConductorError, Result};
pub use swarm::{Execution, Orchestrator, Task};
pub use workflow::{Workflow, WorkflowEngine, WorkflowOptions};
