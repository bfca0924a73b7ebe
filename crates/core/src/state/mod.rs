//! # State
//!
//! Durable records of orchestrations, workflows and insights.

pub mod db;
pub mod store;

pub use db::{ConductorDb, ExecutionRow, WorkflowRow};
pub use store::{MemoryRunStore, RunStore, SqliteRunStore, WorkflowSummary};
