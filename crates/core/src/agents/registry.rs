//! # Agent Registry
//!
//! Holds every available agent for the process lifetime. Built mutably at
//! initialization, then shared read-only behind an `Arc` by concurrent
//! orchestrations.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Agent, Specialization};
use crate::error::{ConductorError, Result};

/// Registry of agents keyed by id, preserving registration order
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<Agent>>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent; fails if its id is already taken
    pub fn register(&mut self, agent: impl Into<Arc<Agent>>) -> Result<()> {
        let agent = agent.into();
        if self.index.contains_key(agent.id()) {
            return Err(ConductorError::DuplicateAgent(agent.id().to_string()));
        }

        tracing::debug!(
            agent_id = %agent.id(),
            specialization = %agent.specialization(),
            "Agent registered"
        );
        self.index.insert(agent.id().to_string(), self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    /// Lazy, restartable iteration over every registered agent
    pub fn list(&self) -> impl Iterator<Item = &Arc<Agent>> + Clone + '_ {
        self.agents.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Agent>> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    /// Agents carrying a given specialization, in registration order
    pub fn with_specialization(
        &self,
        specialization: Specialization,
    ) -> impl Iterator<Item = &Arc<Agent>> + '_ {
        self.agents
            .iter()
            .filter(move |a| a.specialization() == specialization)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::echo_agent;

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = AgentRegistry::new();
        registry
            .register(echo_agent("architect", Specialization::Architecture))
            .unwrap();

        let err = registry
            .register(echo_agent("architect", Specialization::Coding))
            .unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateAgent(id) if id == "architect"));
        assert_eq!(registry.len(), 1);
        // The original registration is untouched
        assert_eq!(
            registry.get("architect").unwrap().specialization(),
            Specialization::Architecture
        );
    }

    #[test]
    fn test_list_is_restartable() {
        let mut registry = AgentRegistry::new();
        registry
            .register(echo_agent("coder", Specialization::Coding))
            .unwrap();
        registry
            .register(echo_agent("reviewer", Specialization::Review))
            .unwrap();

        let agents = registry.list();
        assert_eq!(agents.clone().count(), 2);
        assert_eq!(agents.count(), 2);
        assert_eq!(
            registry
                .with_specialization(Specialization::Review)
                .map(|a| a.id())
                .collect::<Vec<_>>(),
            vec!["reviewer"]
        );
    }
}
