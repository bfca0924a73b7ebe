//! # Stage Planner
//!
//! Classifies a free-form intent and expands it into an ordered list of
//! stages. Classification is a keyword scan, so the same intent always
//! yields the same stage list.

use serde::{Deserialize, Serialize};

use super::pipeline::{Stage, StageKind};
use crate::agents::Specialization;
use crate::context::ProjectContext;
use crate::swarm::{QualityRequirements, Task, TimeConstraints};

/// Name of the stage every workflow starts with
pub const CONTEXT_STAGE: &str = "Context Analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Feature,
    BugFix,
    Refactor,
    Performance,
    Security,
    Testing,
    Documentation,
    Deployment,
}

/// Checked in order; first match wins
const KEYWORDS: &[(IntentKind, &[&str])] = &[
    (IntentKind::BugFix, &["fix", "bug", "crash", "broken", "regression", "error"]),
    (IntentKind::Security, &["secur", "vulnerab", "cve", "exploit", "xss", "injection"]),
    (IntentKind::Performance, &["perf", "slow", "optimi", "latency", "speed", "faster"]),
    (IntentKind::Refactor, &["refactor", "cleanup", "restructur", "simplif", "rename"]),
    (IntentKind::Testing, &["test", "coverage"]),
    (IntentKind::Deployment, &["deploy", "release", "docker", "kubernetes", "ship", "publish"]),
    (IntentKind::Documentation, &["docs", "document", "readme", "changelog"]),
];

impl IntentKind {
    pub fn classify(intent: &str) -> Self {
        let lowered = intent.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        KEYWORDS
            .iter()
            .find(|(_, stems)| {
                words
                    .iter()
                    .any(|word| stems.iter().any(|stem| word.starts_with(stem)))
            })
            .map(|(kind, _)| *kind)
            .unwrap_or(IntentKind::Feature)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::BugFix => "bugfix",
            Self::Refactor => "refactor",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Deployment => "deployment",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [
            Self::Feature,
            Self::BugFix,
            Self::Refactor,
            Self::Performance,
            Self::Security,
            Self::Testing,
            Self::Documentation,
            Self::Deployment,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

/// Caller options for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Skip classification and use this kind
    pub intent_kind: Option<IntentKind>,
    /// Applied to the stage that changes code
    pub quality: QualityRequirements,
    /// Do not request a QA phase on code-changing stages
    pub skip_qa: bool,
    /// Applied to every orchestrated stage
    pub time_constraints: TimeConstraints,
    /// Overrides the configured workflow budget
    pub budget_secs: Option<u64>,
}

/// One planned stage before ids are assigned
struct Blueprint {
    name: &'static str,
    kind: StageKind,
    skill: Specialization,
    supporting: &'static [Specialization],
    /// Code-changing stage: gets QA and the quality requirements
    gated: bool,
}

const fn stage(
    name: &'static str,
    kind: StageKind,
    skill: Specialization,
    supporting: &'static [Specialization],
    gated: bool,
) -> Blueprint {
    Blueprint {
        name,
        kind,
        skill,
        supporting,
        gated,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StagePlanner;

impl StagePlanner {
    pub fn new() -> Self {
        Self
    }

    fn blueprints(kind: IntentKind) -> Vec<Blueprint> {
        use Specialization as S;
        use StageKind as K;

        match kind {
            IntentKind::Feature => vec![
                stage("Design", K::Design, S::Architecture, &[], false),
                stage("Implementation", K::Implementation, S::Coding, &[], true),
                stage("Documentation", K::Documentation, S::Documentation, &[], false),
            ],
            IntentKind::BugFix => vec![
                stage("Fix", K::Implementation, S::Coding, &[S::Testing], true),
                stage("Verification", K::Verification, S::Testing, &[], false),
            ],
            IntentKind::Refactor => vec![
                stage("Refactoring", K::Refactoring, S::Refactoring, &[], true),
                stage("Verification", K::Verification, S::Testing, &[], false),
            ],
            IntentKind::Performance => vec![
                stage("Optimization", K::Optimization, S::Performance, &[], true),
                stage("Verification", K::Verification, S::Testing, &[], false),
            ],
            IntentKind::Security => vec![
                stage("Security Audit", K::SecurityAudit, S::Security, &[], false),
                stage("Remediation", K::Implementation, S::Coding, &[], true),
            ],
            IntentKind::Testing => {
                vec![stage("Test Authoring", K::Verification, S::Testing, &[], true)]
            }
            IntentKind::Documentation => {
                vec![stage("Documentation", K::Documentation, S::Documentation, &[], false)]
            }
            IntentKind::Deployment => vec![
                stage("Release", K::Release, S::Deployment, &[], false),
                stage("Monitoring", K::Monitoring, S::Monitoring, &[], false),
            ],
        }
    }

    /// Ordered stages for an intent. Task ids derive from the workflow id so
    /// the plan is reproducible.
    pub fn plan(
        &self,
        workflow_id: &str,
        intent: &str,
        kind: IntentKind,
        context: &ProjectContext,
        options: &WorkflowOptions,
    ) -> Vec<Stage> {
        let description = match context.language.as_deref() {
            Some(language) => format!("{} ({} project)", intent, language),
            None => intent.to_string(),
        };

        let mut stages = vec![Stage::new(CONTEXT_STAGE, StageKind::Discovery, None)];
        for (index, blueprint) in Self::blueprints(kind).into_iter().enumerate() {
            let mut task = Task::new(format!("{}: {}", blueprint.name, intent), blueprint.skill)
                .with_id(format!("{}-task-{}", workflow_id, index + 1))
                .with_kind(kind.as_str())
                .with_description(description.clone())
                .with_supporting(blueprint.supporting.iter().copied())
                .with_time_constraints(options.time_constraints);
            if blueprint.gated {
                task = task
                    .with_qa(!options.skip_qa)
                    .with_quality(options.quality.clone());
            }
            stages.push(Stage::new(blueprint.name, blueprint.kind, Some(task)));
        }
        stages
    }
}
