//! # Stage Checks
//!
//! Pre-flight checks gate a stage before it runs; a failure aborts the
//! workflow. Post-flight checks inspect the outcome afterwards; a failure is
//! recorded as a warning. Every check runs under the configured timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::pipeline::{Stage, Workflow};
use crate::agents::AgentRegistry;
use crate::config::DefaultAgentPolicy;
use crate::swarm::Execution;

/// Everything a check may look at
pub struct CheckContext<'a> {
    pub workflow: &'a Workflow,
    pub stage: &'a Stage,
    pub registry: &'a AgentRegistry,
    pub default_policy: DefaultAgentPolicy,
    /// Workflow deadline, if a budget is set
    pub deadline: Option<Instant>,
    /// Set for post-flight checks on orchestrated stages
    pub execution: Option<&'a Execution>,
}

#[async_trait]
pub trait StageCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(reason)` when the check does not pass
    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), String>;
}

/// Run one check under `timeout`; a timeout counts as a failure
pub async fn run_check(
    check: &dyn StageCheck,
    ctx: &CheckContext<'_>,
    timeout: Duration,
) -> Result<(), String> {
    match tokio::time::timeout(timeout, check.run(ctx)).await {
        Ok(result) => result,
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}

/// An agent exists for the stage's primary skill
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentsAvailable;

#[async_trait]
impl StageCheck for AgentsAvailable {
    fn name(&self) -> &str {
        "agents_available"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        let Some(task) = &ctx.stage.task else {
            return Ok(());
        };
        if ctx.registry.with_specialization(task.primary_skill).next().is_some() {
            return Ok(());
        }
        match ctx.default_policy {
            DefaultAgentPolicy::FirstRegistered if !ctx.registry.is_empty() => Ok(()),
            _ => Err(format!("no agent registered for '{}'", task.primary_skill)),
        }
    }
}

/// The workflow deadline has not passed
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetRemaining;

#[async_trait]
impl StageCheck for BudgetRemaining {
    fn name(&self) -> &str {
        "budget_remaining"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        match ctx.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err("workflow budget is spent".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoEscalatedConflicts;

#[async_trait]
impl StageCheck for NoEscalatedConflicts {
    fn name(&self) -> &str {
        "no_escalated_conflicts"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        let Some(execution) = ctx.execution else {
            return Ok(());
        };
        let subjects: Vec<&str> = execution
            .escalations()
            .map(|c| c.conflict.subject.as_str())
            .collect();
        if subjects.is_empty() {
            Ok(())
        } else {
            Err(format!("escalated conflicts on {}", subjects.join(", ")))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllAgentsSucceeded;

#[async_trait]
impl StageCheck for AllAgentsSucceeded {
    fn name(&self) -> &str {
        "all_agents_succeeded"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), String> {
        let Some(execution) = ctx.execution else {
            return Ok(());
        };
        let failed: Vec<String> = execution
            .failed_agents()
            .map(|(phase, agent)| format!("{} ({})", agent, phase))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(format!("agents failed: {}", failed.join(", ")))
        }
    }
}

pub fn default_pre_flight() -> Vec<Arc<dyn StageCheck>> {
    vec![Arc::new(AgentsAvailable), Arc::new(BudgetRemaining)]
}

pub fn default_post_flight() -> Vec<Arc<dyn StageCheck>> {
    vec![Arc::new(NoEscalatedConflicts), Arc::new(AllAgentsSucceeded)]
}
