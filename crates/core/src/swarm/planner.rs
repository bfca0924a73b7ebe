//! # Collaboration Planner
//!
//! Turns a team and a task into an ordered list of phases:
//!
//! ```text
//! Analysis (parallel, everyone)
//!   → Implementation (sequential pipeline, primary + supporting by rank)
//!     → Quality Review (QA members, validated when the task demands it)
//! ```
//!
//! Planning is pure: identical inputs always give an identical plan.

use serde::{Deserialize, Serialize};

use crate::agents::{Team, TeamMember, TeamRole};
use crate::swarm::Task;

pub const ANALYSIS_PHASE: &str = "Analysis";
pub const IMPLEMENTATION_PHASE: &str = "Implementation";
pub const QUALITY_REVIEW_PHASE: &str = "Quality Review";

/// How a phase runs its assignments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    /// Concurrently, joined before the phase completes
    Parallel,
    /// One at a time, in list order
    Sequential,
}

/// One agent's subtask within a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub subtask: String,
    /// Receive the preceding output (the previous entry, or the result
    /// carried over from the previous phase for the first entry)
    pub uses_previous_result: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub mode: PhaseMode,
    pub assignments: Vec<AgentAssignment>,
    /// Gate the phase through the orchestrator's validator
    pub requires_validation: bool,
}

/// Ordered phases for one orchestration; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationPlan {
    pub phases: Vec<Phase>,
}

impl CollaborationPlan {
    /// Every agent id referenced by an assignment, in plan order
    pub fn agent_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.phases
            .iter()
            .flat_map(|p| p.assignments.iter().map(|a| a.agent_id.as_str()))
    }
}

/// Caller-supplied shaping of the plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConstraints {
    /// Run every phase sequentially
    #[serde(default)]
    pub force_sequential: bool,
    /// Split parallel phases into batches of at most this many agents
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    /// Drop the analysis phase when other phases remain
    #[serde(default)]
    pub skip_analysis: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollaborationPlanner;

impl CollaborationPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn create_plan(
        &self,
        team: &Team,
        task: &Task,
        constraints: &PlanConstraints,
    ) -> CollaborationPlan {
        let mut work_phases = Vec::new();
        if let Some(phase) = Self::implementation_phase(team, task) {
            work_phases.push(phase);
        }
        if let Some(phase) = Self::quality_phase(team, task) {
            work_phases.push(phase);
        }

        let keep_analysis = !constraints.skip_analysis || work_phases.is_empty();
        let mut phases = Vec::with_capacity(work_phases.len() + 1);
        if keep_analysis {
            phases.push(Self::analysis_phase(team, task));
            // The first pipeline entry picks up what analysis produced
            if let Some(implementation) = work_phases
                .first_mut()
                .filter(|p| p.name == IMPLEMENTATION_PHASE)
            {
                if let Some(first) = implementation.assignments.first_mut() {
                    first.uses_previous_result = true;
                }
            }
        }
        phases.extend(work_phases);

        if task.needs_validation() {
            if let Some(last) = phases.last_mut() {
                last.requires_validation = true;
            }
        }

        if constraints.force_sequential {
            for phase in &mut phases {
                phase.mode = PhaseMode::Sequential;
            }
        }

        if let Some(limit) = constraints.max_parallelism {
            phases = Self::split_batches(phases, limit.max(1));
        }

        CollaborationPlan { phases }
    }

    fn analysis_phase(team: &Team, task: &Task) -> Phase {
        Phase {
            name: ANALYSIS_PHASE.to_string(),
            mode: PhaseMode::Parallel,
            assignments: team
                .members()
                .iter()
                .map(|m| AgentAssignment {
                    agent_id: m.agent.id().to_string(),
                    subtask: format!(
                        "Analyze '{}' from a {} perspective",
                        task.name,
                        m.agent.specialization()
                    ),
                    uses_previous_result: false,
                })
                .collect(),
            requires_validation: false,
        }
    }

    fn implementation_phase(team: &Team, task: &Task) -> Option<Phase> {
        let mut builders: Vec<&TeamMember> = team
            .members()
            .iter()
            .filter(|m| matches!(m.role, TeamRole::Primary | TeamRole::Supporting))
            .collect();
        if builders.is_empty() {
            return None;
        }
        // Stable: equal ranks keep team order
        builders.sort_by_key(|m| m.agent.specialization().pipeline_rank());

        let assignments = builders
            .iter()
            .enumerate()
            .map(|(i, m)| AgentAssignment {
                agent_id: m.agent.id().to_string(),
                subtask: match m.role {
                    TeamRole::Primary => format!("Implement '{}': {}", task.name, task.description),
                    _ => format!(
                        "Contribute {} work to '{}'",
                        m.agent.specialization(),
                        task.name
                    ),
                },
                uses_previous_result: i > 0,
            })
            .collect();

        Some(Phase {
            name: IMPLEMENTATION_PHASE.to_string(),
            mode: PhaseMode::Sequential,
            assignments,
            requires_validation: false,
        })
    }

    fn quality_phase(team: &Team, task: &Task) -> Option<Phase> {
        let qa: Vec<&TeamMember> = team.with_role(TeamRole::QualityAssurance).collect();
        if qa.is_empty() {
            return None;
        }

        Some(Phase {
            name: QUALITY_REVIEW_PHASE.to_string(),
            mode: if qa.len() > 1 {
                PhaseMode::Parallel
            } else {
                PhaseMode::Sequential
            },
            assignments: qa
                .iter()
                .map(|m| AgentAssignment {
                    agent_id: m.agent.id().to_string(),
                    subtask: format!(
                        "Run {} checks on the result of '{}'",
                        m.agent.specialization(),
                        task.name
                    ),
                    uses_previous_result: true,
                })
                .collect(),
            requires_validation: false,
        })
    }

    fn split_batches(phases: Vec<Phase>, limit: usize) -> Vec<Phase> {
        let mut out = Vec::with_capacity(phases.len());
        for phase in phases {
            if phase.mode != PhaseMode::Parallel || phase.assignments.len() <= limit {
                out.push(phase);
                continue;
            }

            let batches: Vec<Vec<AgentAssignment>> = phase
                .assignments
                .chunks(limit)
                .map(|c| c.to_vec())
                .collect();
            let count = batches.len();
            for (i, assignments) in batches.into_iter().enumerate() {
                out.push(Phase {
                    name: format!("{} #{}", phase.name, i + 1),
                    mode: PhaseMode::Parallel,
                    assignments,
                    requires_validation: phase.requires_validation && i + 1 == count,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::echo_agent;
    use crate::agents::{AgentRegistry, AgentSelector, Specialization};

    fn team_for(task: &Task, agents: &[(&str, Specialization)]) -> Team {
        let mut registry = AgentRegistry::new();
        for (id, skill) in agents {
            registry.register(echo_agent(id, *skill)).unwrap();
        }
        AgentSelector::default()
            .assemble_team(task, &registry)
            .unwrap()
    }

    fn trio() -> [(&'static str, Specialization); 3] {
        [
            ("architect", Specialization::Architecture),
            ("coder", Specialization::Coding),
            ("reviewer", Specialization::Review),
        ]
    }

    #[test]
    fn test_qa_team_plan() {
        let task = Task::new("login", Specialization::Coding).with_qa(true);
        let team = team_for(&task, &trio());
        let plan = CollaborationPlanner::new().create_plan(&team, &task, &PlanConstraints::default());

        assert!(plan.phases.len() >= 2);
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![ANALYSIS_PHASE, IMPLEMENTATION_PHASE, QUALITY_REVIEW_PHASE]);

        let analysis = &plan.phases[0];
        assert_eq!(analysis.mode, PhaseMode::Parallel);
        assert_eq!(analysis.assignments.len(), 3);
        assert!(analysis.assignments.iter().all(|a| !a.uses_previous_result));

        // Architecture ranks before coding
        let implementation = &plan.phases[1];
        assert_eq!(implementation.mode, PhaseMode::Sequential);
        let order: Vec<&str> = implementation
            .assignments
            .iter()
            .map(|a| a.agent_id.as_str())
            .collect();
        assert_eq!(order, vec!["architect", "coder"]);
        assert!(implementation.assignments.iter().all(|a| a.uses_previous_result));

        let last = plan.phases.last().unwrap();
        assert!(last.requires_validation);
        assert_eq!(last.mode, PhaseMode::Sequential);
        assert!(last.assignments.iter().any(|a| a.agent_id == "reviewer"));
        assert!(plan.phases[..2].iter().all(|p| !p.requires_validation));
    }

    #[test]
    fn test_plan_references_only_team_agents() {
        let task = Task::new("api", Specialization::Coding)
            .with_supporting([Specialization::Architecture, Specialization::Documentation])
            .with_qa(true);
        let team = team_for(
            &task,
            &[
                ("architect", Specialization::Architecture),
                ("coder", Specialization::Coding),
                ("reviewer", Specialization::Review),
                ("tester", Specialization::Testing),
                ("documenter", Specialization::Documentation),
            ],
        );
        let plan = CollaborationPlanner::new().create_plan(&team, &task, &PlanConstraints::default());

        assert!(!plan.phases.is_empty());
        assert!(plan.agent_ids().all(|id| team.contains(id)));
        // Two QA agents review in parallel
        assert_eq!(plan.phases.last().unwrap().mode, PhaseMode::Parallel);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let task = Task::new("login", Specialization::Coding).with_qa(true);
        let team = team_for(&task, &trio());
        let constraints = PlanConstraints {
            max_parallelism: Some(2),
            ..Default::default()
        };
        let planner = CollaborationPlanner::new();
        assert_eq!(
            planner.create_plan(&team, &task, &constraints),
            planner.create_plan(&team, &task, &constraints)
        );
    }

    #[test]
    fn test_single_agent_keeps_a_phase() {
        let task = Task::new("solo", Specialization::Architecture);
        let team = team_for(&task, &[("architect", Specialization::Architecture)]);
        let constraints = PlanConstraints {
            skip_analysis: true,
            ..Default::default()
        };
        let plan = CollaborationPlanner::new().create_plan(&team, &task, &constraints);

        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].name, IMPLEMENTATION_PHASE);
        // Nothing ran before it
        assert!(!plan.phases[0].assignments[0].uses_previous_result);
    }

    #[test]
    fn test_max_parallelism_splits_batches() {
        let task = Task::new("login", Specialization::Coding).with_qa(true);
        let team = team_for(&task, &trio());
        let constraints = PlanConstraints {
            max_parallelism: Some(2),
            ..Default::default()
        };
        let plan = CollaborationPlanner::new().create_plan(&team, &task, &constraints);

        assert_eq!(plan.phases[0].name, "Analysis #1");
        assert_eq!(plan.phases[0].assignments.len(), 2);
        assert_eq!(plan.phases[1].name, "Analysis #2");
        assert_eq!(plan.phases[1].assignments.len(), 1);
        assert!(plan
            .phases
            .iter()
            .filter(|p| p.mode == PhaseMode::Parallel)
            .all(|p| p.assignments.len() <= 2));
    }

    #[test]
    fn test_force_sequential() {
        let task = Task::new("login", Specialization::Coding).with_qa(true);
        let team = team_for(&task, &trio());
        let constraints = PlanConstraints {
            force_sequential: true,
            ..Default::default()
        };
        let plan = CollaborationPlanner::new().create_plan(&team, &task, &constraints);
        assert!(plan.phases.iter().all(|p| p.mode == PhaseMode::Sequential));
    }
}
