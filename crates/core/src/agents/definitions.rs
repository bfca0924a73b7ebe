//! # Agent Definitions
//!
//! The default LLM-backed roster. Each factory takes the resolved
//! [`ModelConfig`] for its agent so per-agent model overrides apply.

use super::{Agent, AgentRegistry, LlmWork, Specialization};
use crate::config::ModelSettings;
use crate::error::Result;
use crate::models::ModelConfig;

fn llm_agent(
    id: &str,
    name: &str,
    specialization: Specialization,
    config: ModelConfig,
    capabilities: &[&str],
) -> Agent {
    Agent::new(id, name, specialization, LlmWork::new(specialization, config))
        .with_capabilities(capabilities.iter().copied())
}

/// The Architect
///
/// Designs module boundaries before anyone writes code.
pub fn architect_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "architect",
        "Architect",
        Specialization::Architecture,
        config,
        &["system-design", "interfaces", "data-modeling"],
    )
}

/// The Coder
///
/// Main implementation agent.
pub fn coder_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "coder",
        "Coder",
        Specialization::Coding,
        config,
        &["implementation", "bug-fixing"],
    )
}

pub fn refactorer_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "refactorer",
        "Refactorer",
        Specialization::Refactoring,
        config,
        &["restructuring", "cleanup"],
    )
}

pub fn performance_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "optimizer",
        "Optimizer",
        Specialization::Performance,
        config,
        &["profiling", "optimization"],
    )
}

/// The Reviewer
///
/// Quality gate: reports a verdict and a `review_score`.
pub fn reviewer_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "reviewer",
        "Reviewer",
        Specialization::Review,
        config,
        &["code-review", "style"],
    )
}

/// The Tester
///
/// Quality gate: writes tests and reports `coverage`.
pub fn tester_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "tester",
        "Tester",
        Specialization::Testing,
        config,
        &["unit-tests", "integration-tests"],
    )
}

/// The Security Auditor
pub fn security_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "security",
        "Security Auditor",
        Specialization::Security,
        config,
        &["threat-modeling", "dependency-audit"],
    )
}

pub fn documenter_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "documenter",
        "Documenter",
        Specialization::Documentation,
        config,
        &["readme", "api-docs"],
    )
}

pub fn deployer_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "deployer",
        "Deployer",
        Specialization::Deployment,
        config,
        &["ci", "packaging"],
    )
}

pub fn monitor_agent(config: ModelConfig) -> Agent {
    llm_agent(
        "monitor",
        "Monitor",
        Specialization::Monitoring,
        config,
        &["logging", "alerting"],
    )
}

/// All default agents, in pipeline order, each with its resolved model
pub fn default_roster(models: &ModelSettings) -> Vec<Agent> {
    let factories: [(&str, fn(ModelConfig) -> Agent); 10] = [
        ("architect", architect_agent),
        ("coder", coder_agent),
        ("refactorer", refactorer_agent),
        ("optimizer", performance_agent),
        ("security", security_agent),
        ("documenter", documenter_agent),
        ("tester", tester_agent),
        ("reviewer", reviewer_agent),
        ("deployer", deployer_agent),
        ("monitor", monitor_agent),
    ];

    factories
        .into_iter()
        .map(|(id, factory)| factory(models.model_for(id)))
        .collect()
}

/// Registry holding the full default roster
pub fn create_roster(models: &ModelSettings) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for agent in default_roster(models) {
        registry.register(agent)?;
    }
    Ok(registry)
}
