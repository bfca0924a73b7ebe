//! # Agent Selector
//!
//! Chooses the team for a task: one primary agent, supporting agents and
//! quality-assurance agents. Supporting and QA choices are pluggable through
//! [`SelectionStrategy`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::{Agent, AgentRegistry, Specialization};
use crate::config::DefaultAgentPolicy;
use crate::error::{ConductorError, Result};
use crate::swarm::Task;

/// Role of a member within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Primary,
    Supporting,
    QualityAssurance,
}

/// One agent assigned to a task
#[derive(Debug, Clone)]
pub struct TeamMember {
    pub agent: Arc<Agent>,
    pub role: TeamRole,
}

impl TeamMember {
    pub fn new(agent: Arc<Agent>, role: TeamRole) -> Self {
        Self { agent, role }
    }
}

/// Ordered team, primary first
#[derive(Debug, Clone, Default)]
pub struct Team {
    members: Vec<TeamMember>,
}

impl Team {
    pub fn new(members: Vec<TeamMember>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn primary(&self) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.role == TeamRole::Primary)
    }

    pub fn with_role(&self, role: TeamRole) -> impl Iterator<Item = &TeamMember> + '_ {
        self.members.iter().filter(move |m| m.role == role)
    }

    pub fn get(&self, agent_id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.agent.id() == agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.get(agent_id).is_some()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.agent.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Pluggable choice of supporting and QA agents.
///
/// Implementations may return an empty set. The selector strips the primary
/// from whatever is returned.
pub trait SelectionStrategy: Send + Sync {
    fn select_supporting(
        &self,
        task: &Task,
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>>;

    fn select_qa(&self, task: &Task, candidates: &[Arc<Agent>], primary: &Agent)
        -> Vec<Arc<Agent>>;
}

/// Skill-table strategy: explicit supporting skills, else a companion per
/// primary skill; review/testing/security agents for QA.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl DefaultStrategy {
    /// Companion skills used when a task names no supporting skills
    pub fn companions(primary: Specialization) -> &'static [Specialization] {
        use Specialization::*;
        match primary {
            Coding => &[Architecture],
            Refactoring => &[Architecture],
            Performance => &[Coding],
            Testing => &[Coding],
            Deployment => &[Monitoring],
            Documentation => &[Coding],
            Architecture | Review | Security | Monitoring => &[],
        }
    }

    fn first_per_skill(
        skills: &[Specialization],
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>> {
        let mut picked: Vec<Arc<Agent>> = Vec::new();
        for skill in skills {
            let found = candidates.iter().find(|a| {
                a.specialization() == *skill
                    && a.id() != primary.id()
                    && !picked.iter().any(|p| p.id() == a.id())
            });
            if let Some(agent) = found {
                picked.push(Arc::clone(agent));
            }
        }
        picked
    }
}

impl SelectionStrategy for DefaultStrategy {
    fn select_supporting(
        &self,
        task: &Task,
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>> {
        let skills: Vec<Specialization> = if task.supporting_skills.is_empty() {
            Self::companions(task.primary_skill).to_vec()
        } else {
            task.supporting_skills.clone()
        };
        Self::first_per_skill(&skills, candidates, primary)
    }

    fn select_qa(
        &self,
        task: &Task,
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>> {
        if !task.wants_qa() {
            return Vec::new();
        }

        let mut skills = Vec::new();
        if task.requires_qa || task.quality.min_review_score.is_some() {
            skills.push(Specialization::Review);
        }
        if task.requires_qa || task.quality.min_coverage.is_some() {
            skills.push(Specialization::Testing);
        }
        if task.quality.security_review {
            skills.push(Specialization::Security);
        }
        Self::first_per_skill(&skills, candidates, primary)
    }
}

/// Team selection front-end
#[derive(Clone)]
pub struct AgentSelector {
    strategy: Arc<dyn SelectionStrategy>,
    default_policy: DefaultAgentPolicy,
}

impl Default for AgentSelector {
    fn default() -> Self {
        Self::new(DefaultStrategy, DefaultAgentPolicy::Fail)
    }
}

impl AgentSelector {
    pub fn new(strategy: impl SelectionStrategy + 'static, default_policy: DefaultAgentPolicy) -> Self {
        Self {
            strategy: Arc::new(strategy),
            default_policy,
        }
    }

    pub fn default_policy(&self) -> DefaultAgentPolicy {
        self.default_policy
    }

    /// First candidate whose specialization matches the task's primary skill
    pub fn select_primary(&self, task: &Task, candidates: &[Arc<Agent>]) -> Result<Arc<Agent>> {
        if let Some(agent) = candidates
            .iter()
            .find(|a| a.specialization() == task.primary_skill)
        {
            return Ok(Arc::clone(agent));
        }

        match (self.default_policy, candidates.first()) {
            (DefaultAgentPolicy::FirstRegistered, Some(fallback)) => {
                tracing::warn!(
                    task_id = %task.id,
                    skill = %task.primary_skill,
                    fallback = %fallback.id(),
                    "No agent matches primary skill, using first registered agent"
                );
                Ok(Arc::clone(fallback))
            }
            _ => Err(ConductorError::Selection {
                skill: task.primary_skill,
            }),
        }
    }

    pub fn select_supporting(
        &self,
        task: &Task,
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>> {
        let mut picked = self.strategy.select_supporting(task, candidates, primary);
        picked.retain(|a| a.id() != primary.id());
        picked
    }

    pub fn select_qa(
        &self,
        task: &Task,
        candidates: &[Arc<Agent>],
        primary: &Agent,
    ) -> Vec<Arc<Agent>> {
        let mut picked = self.strategy.select_qa(task, candidates, primary);
        picked.retain(|a| a.id() != primary.id());
        picked
    }

    /// Drop duplicate ids and redundant members.
    ///
    /// A non-primary member is redundant when it shares the primary's
    /// specialization. The result is a subsequence of the input.
    pub fn optimize_team(&self, team: Team, task: &Task) -> Team {
        let before = team.len();
        let primary_skill = team.primary().map(|m| m.agent.specialization());
        let mut seen_ids = HashSet::new();
        let mut members = Vec::with_capacity(before);

        for member in team.members {
            if !seen_ids.insert(member.agent.id().to_string()) {
                continue;
            }
            if member.role != TeamRole::Primary
                && Some(member.agent.specialization()) == primary_skill
            {
                continue;
            }
            members.push(member);
        }

        if members.len() < before {
            tracing::debug!(
                task_id = %task.id,
                removed = before - members.len(),
                "Removed redundant team members"
            );
        }
        Team { members }
    }

    /// Run primary, supporting and QA selection against the registry
    pub fn assemble_team(&self, task: &Task, registry: &AgentRegistry) -> Result<Team> {
        let candidates: Vec<Arc<Agent>> = registry.list().cloned().collect();
        let primary = self.select_primary(task, &candidates)?;
        let supporting = self.select_supporting(task, &candidates, &primary);
        let qa = self.select_qa(task, &candidates, &primary);

        let mut members = vec![TeamMember::new(Arc::clone(&primary), TeamRole::Primary)];
        members.extend(
            supporting
                .into_iter()
                .map(|a| TeamMember::new(a, TeamRole::Supporting)),
        );
        members.extend(
            qa.into_iter()
                .map(|a| TeamMember::new(a, TeamRole::QualityAssurance)),
        );

        Ok(self.optimize_team(Team::new(members), task))
    }
}
