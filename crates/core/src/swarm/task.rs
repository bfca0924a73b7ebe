//! # Tasks
//!
//! The caller-supplied description of one unit of orchestrated work.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::Specialization;

/// Quality gates a task's output must meet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRequirements {
    /// Minimum `coverage` metric reported by testing agents (0.0 - 1.0)
    #[serde(default)]
    pub min_coverage: Option<f64>,
    /// Minimum `review_score` metric reported by review agents (0.0 - 1.0)
    #[serde(default)]
    pub min_review_score: Option<f64>,
    /// Require a security agent in the QA set
    #[serde(default)]
    pub security_review: bool,
}

impl QualityRequirements {
    /// Whether a coverage or review threshold is specified
    pub fn has_threshold(&self) -> bool {
        self.min_coverage.is_some() || self.min_review_score.is_some()
    }
}

/// Time budgets for a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConstraints {
    /// Budget for one agent invocation
    #[serde(default)]
    pub agent_timeout_ms: Option<u64>,
    /// Budget for the whole orchestration
    #[serde(default)]
    pub total_budget_ms: Option<u64>,
}

impl TimeConstraints {
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_ms.map(Duration::from_millis)
    }

    pub fn total_budget(&self) -> Option<Duration> {
        self.total_budget_ms.map(Duration::from_millis)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A task submitted for orchestration; immutable once submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Free-form type tag (e.g. "feature", "bugfix")
    pub kind: String,
    pub description: String,
    pub primary_skill: Specialization,
    #[serde(default)]
    pub supporting_skills: Vec<Specialization>,
    #[serde(default)]
    pub requires_qa: bool,
    #[serde(default)]
    pub quality: QualityRequirements,
    #[serde(default)]
    pub time_constraints: TimeConstraints,
}

impl Task {
    pub fn new(name: impl Into<String>, primary_skill: Specialization) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            kind: "general".to_string(),
            description: String::new(),
            primary_skill,
            supporting_skills: Vec::new(),
            requires_qa: false,
            quality: QualityRequirements::default(),
            time_constraints: TimeConstraints::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_supporting(mut self, skills: impl IntoIterator<Item = Specialization>) -> Self {
        self.supporting_skills.extend(skills);
        self
    }

    pub fn with_qa(mut self, requires_qa: bool) -> Self {
        self.requires_qa = requires_qa;
        self
    }

    pub fn with_quality(mut self, quality: QualityRequirements) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_time_constraints(mut self, constraints: TimeConstraints) -> Self {
        self.time_constraints = constraints;
        self
    }

    /// Whether the final phase of the plan must pass validation
    pub fn needs_validation(&self) -> bool {
        self.requires_qa || self.quality.has_threshold()
    }

    /// Whether QA agents should be selected at all
    pub fn wants_qa(&self) -> bool {
        self.needs_validation() || self.quality.security_review
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_drives_validation() {
        let task = Task::new("login", Specialization::Coding);
        assert!(!task.needs_validation());

        let task = task.with_quality(QualityRequirements {
            min_coverage: Some(0.8),
            ..Default::default()
        });
        assert!(task.needs_validation());
        assert!(task.wants_qa());
    }

    #[test]
    fn test_security_review_wants_qa_without_validation() {
        let task = Task::new("auth", Specialization::Coding).with_quality(QualityRequirements {
            security_review: true,
            ..Default::default()
        });
        assert!(task.wants_qa());
        assert!(!task.needs_validation());
    }

    #[test]
    fn test_budgets_in_milliseconds() {
        let limits = TimeConstraints {
            agent_timeout_ms: Some(1_500),
            total_budget_ms: None,
        };
        assert_eq!(limits.agent_timeout(), Some(Duration::from_millis(1_500)));
        assert_eq!(limits.total_budget(), None);

        assert_eq!(duration_ms(Duration::from_secs(2)), 2_000);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
