//! # Conflicts
//!
//! Detection rules run after each phase, and the resolver that decides
//! between competing agent proposals.
//!
//! Resolution order:
//! 1. `merge` when every claim carries the same content (or only one has any)
//! 2. `priority_override` when one claimant outranks the rest
//!    (primary role first, then specialization priority)
//! 3. `escalate` otherwise

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::executor::AgentResult;
use super::planner::{Phase, PhaseMode};
use crate::agents::{Specialization, Team, TeamRole, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two or more agents produced the same named artifact
    ArtifactOverlap,
    /// QA agents disagree on the verdict
    VerdictMismatch,
}

/// One agent's side of a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub agent_id: String,
    pub specialization: Specialization,
    pub role: TeamRole,
    /// Proposed content (artifact body or verdict)
    pub content: Option<String>,
}

impl Claim {
    fn rank(&self) -> (bool, u8) {
        (
            self.role == TeamRole::Primary,
            self.specialization.conflict_priority(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub phase: String,
    pub kind: ConflictKind,
    /// Artifact name, or `verdict`
    pub subject: String,
    pub claims: Vec<Claim>,
}

impl Conflict {
    pub fn new(phase: &str, kind: ConflictKind, subject: impl Into<String>, claims: Vec<Claim>) -> Self {
        Self {
            id: format!("conflict-{}", uuid::Uuid::new_v4()),
            phase: phase.to_string(),
            kind,
            subject: subject.into(),
            claims,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Merge,
    PriorityOverride,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    /// Winning agent, for priority overrides
    #[serde(default)]
    pub winner: Option<String>,
    /// Content that stands after resolution
    #[serde(default)]
    pub content: Option<String>,
    pub rationale: String,
}

impl Resolution {
    pub fn is_escalated(&self) -> bool {
        self.strategy == ResolutionStrategy::Escalate
    }
}

/// A detected conflict together with how it was settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub resolution: Resolution,
}

/// Detects one kind of conflict in a phase's results
pub trait ConflictRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `results` are in assignment order, as recorded by the executor
    fn detect(&self, phase: &Phase, results: &[AgentResult], team: &Team) -> Vec<Conflict>;
}

fn claim_for(agent_id: &str, team: &Team, content: Option<String>) -> Option<Claim> {
    let member = team.get(agent_id)?;
    Some(Claim {
        agent_id: agent_id.to_string(),
        specialization: member.agent.specialization(),
        role: member.role,
        content,
    })
}

/// Flags artifacts written by more than one successful agent.
///
/// In a sequential phase an entry that received the previous output refines
/// it, so its artifacts replace the earlier claims instead of competing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactOverlap;

impl ConflictRule for ArtifactOverlap {
    fn name(&self) -> &'static str {
        "artifact_overlap"
    }

    fn detect(&self, phase: &Phase, results: &[AgentResult], team: &Team) -> Vec<Conflict> {
        let mut by_artifact: BTreeMap<&str, Vec<Claim>> = BTreeMap::new();
        for (index, result) in results.iter().enumerate() {
            let Some(output) = result.output() else {
                continue;
            };
            let chained = phase.mode == PhaseMode::Sequential
                && index > 0
                && phase
                    .assignments
                    .get(index)
                    .is_some_and(|a| a.uses_previous_result);

            for (name, content) in &output.artifacts {
                let claims = by_artifact.entry(name.as_str()).or_default();
                if chained {
                    claims.clear();
                } else if claims.iter().any(|c| c.agent_id == result.agent_id) {
                    continue;
                }
                if let Some(claim) = claim_for(&result.agent_id, team, Some(content.clone())) {
                    claims.push(claim);
                }
            }
        }

        by_artifact
            .into_iter()
            .filter(|(_, claims)| claims.len() > 1)
            .map(|(name, claims)| {
                Conflict::new(&phase.name, ConflictKind::ArtifactOverlap, name, claims)
            })
            .collect()
    }
}

/// Flags QA members that returned different verdicts
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictMismatch;

impl VerdictMismatch {
    fn label(verdict: Verdict) -> &'static str {
        match verdict {
            Verdict::Approve => "approve",
            Verdict::RequestChanges => "request_changes",
            Verdict::Reject => "reject",
        }
    }
}

impl ConflictRule for VerdictMismatch {
    fn name(&self) -> &'static str {
        "verdict_mismatch"
    }

    fn detect(&self, phase: &Phase, results: &[AgentResult], team: &Team) -> Vec<Conflict> {
        let claims: Vec<Claim> = results
            .iter()
            .filter_map(|r| {
                let verdict = r.output()?.verdict?;
                let claim = claim_for(&r.agent_id, team, Some(Self::label(verdict).to_string()))?;
                (claim.role == TeamRole::QualityAssurance).then_some(claim)
            })
            .collect();

        let distinct: BTreeSet<_> = claims.iter().map(|c| c.content.clone()).collect();
        if distinct.len() > 1 {
            vec![Conflict::new(&phase.name, ConflictKind::VerdictMismatch, "verdict", claims)]
        } else {
            Vec::new()
        }
    }
}

/// Rules installed when none are configured
pub fn default_rules() -> Vec<std::sync::Arc<dyn ConflictRule>> {
    vec![std::sync::Arc::new(ArtifactOverlap), std::sync::Arc::new(VerdictMismatch)]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Settle a conflict; never fails, escalation is itself a resolution
    pub fn resolve(&self, conflict: &Conflict) -> Resolution {
        let proposals: BTreeSet<&str> = conflict
            .claims
            .iter()
            .filter_map(|c| c.content.as_deref())
            .filter(|c| !c.is_empty())
            .collect();

        if proposals.len() <= 1 {
            return Resolution {
                strategy: ResolutionStrategy::Merge,
                winner: None,
                content: proposals.into_iter().next().map(str::to_string),
                rationale: format!(
                    "{} claimants agree on '{}'",
                    conflict.claims.len(),
                    conflict.subject
                ),
            };
        }

        let Some(top) = conflict.claims.iter().map(Claim::rank).max() else {
            return Self::escalate(conflict, "no claimants");
        };
        let leaders: Vec<&Claim> = conflict.claims.iter().filter(|c| c.rank() == top).collect();
        let leading_content: BTreeSet<Option<&str>> =
            leaders.iter().map(|c| c.content.as_deref()).collect();

        match (leaders.first(), leading_content.len()) {
            (Some(winner), 1) => Resolution {
                strategy: ResolutionStrategy::PriorityOverride,
                winner: Some(winner.agent_id.clone()),
                content: winner.content.clone(),
                rationale: if winner.role == TeamRole::Primary {
                    format!("primary agent '{}' takes precedence", winner.agent_id)
                } else {
                    format!(
                        "'{}' ({}) outranks the other claimants",
                        winner.agent_id, winner.specialization
                    )
                },
            },
            _ => Self::escalate(
                conflict,
                &format!(
                    "{} equally ranked claimants disagree",
                    leaders.len()
                ),
            ),
        }
    }

    fn escalate(conflict: &Conflict, reason: &str) -> Resolution {
        tracing::warn!(
            conflict_id = %conflict.id,
            subject = %conflict.subject,
            reason,
            "Conflict escalated"
        );
        Resolution {
            strategy: ResolutionStrategy::Escalate,
            winner: None,
            content: None,
            rationale: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(id: &str, skill: Specialization, role: TeamRole, content: &str) -> Claim {
        Claim {
            agent_id: id.to_string(),
            specialization: skill,
            role,
            content: Some(content.to_string()),
        }
    }

    #[test]
    fn test_identical_proposals_merge() {
        let conflict = Conflict::new(
            "Analysis",
            ConflictKind::ArtifactOverlap,
            "src/lib.rs",
            vec![
                claim("a", Specialization::Coding, TeamRole::Supporting, "fn x() {}"),
                claim("b", Specialization::Refactoring, TeamRole::Supporting, "fn x() {}"),
            ],
        );
        let resolution = ConflictResolver::new().resolve(&conflict);
        assert_eq!(resolution.strategy, ResolutionStrategy::Merge);
        assert_eq!(resolution.content.as_deref(), Some("fn x() {}"));
    }

    #[test]
    fn test_primary_overrides() {
        let conflict = Conflict::new(
            "Analysis",
            ConflictKind::ArtifactOverlap,
            "src/lib.rs",
            vec![
                claim("architect", Specialization::Architecture, TeamRole::Supporting, "a"),
                claim("coder", Specialization::Coding, TeamRole::Primary, "b"),
            ],
        );
        let resolution = ConflictResolver::new().resolve(&conflict);
        assert_eq!(resolution.strategy, ResolutionStrategy::PriorityOverride);
        assert_eq!(resolution.winner.as_deref(), Some("coder"));
        assert_eq!(resolution.content.as_deref(), Some("b"));
    }

    #[test]
    fn test_specialization_breaks_ties() {
        let conflict = Conflict::new(
            "Quality Review",
            ConflictKind::VerdictMismatch,
            "verdict",
            vec![
                claim("reviewer", Specialization::Review, TeamRole::QualityAssurance, "approve"),
                claim("security", Specialization::Security, TeamRole::QualityAssurance, "reject"),
            ],
        );
        let resolution = ConflictResolver::new().resolve(&conflict);
        assert_eq!(resolution.winner.as_deref(), Some("security"));
    }

    #[test]
    fn test_equal_rank_escalates() {
        let conflict = Conflict::new(
            "Implementation",
            ConflictKind::ArtifactOverlap,
            "README.md",
            vec![
                claim("doc-a", Specialization::Documentation, TeamRole::Supporting, "one"),
                claim("doc-b", Specialization::Documentation, TeamRole::Supporting, "two"),
            ],
        );
        let resolution = ConflictResolver::new().resolve(&conflict);
        assert!(resolution.is_escalated());
        assert!(resolution.winner.is_none());
    }
}
