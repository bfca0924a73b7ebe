//! # LLM-backed Work
//!
//! [`AgentWork`] that asks a radkit `LlmFunction` for a structured report.
//! Each specialization gets its own system prompt; the provider and model come
//! from [`ModelConfig`].

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AgentOutput, AgentTask, AgentWork, Specialization, Verdict, WorkContext};
use crate::models::ModelConfig;

/// Run an `LlmFunction` against whichever provider the config names.
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use radkit::agent::LlmFunction;
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        let result: anyhow::Result<$output_type> = match config.provider {
            LlmProvider::Anthropic => {
                let llm = AnthropicLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenAI => {
                let mut llm = OpenAILlm::from_env(&config.model)?;
                if let Some(base_url) = &config.base_url {
                    llm = llm.with_base_url(base_url);
                }
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Gemini => {
                let llm = GeminiLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenRouter => {
                let llm = OpenRouterLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Grok => {
                let llm = GrokLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::DeepSeek => {
                let llm = DeepSeekLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
        };
        result
    }};
}

/// Append the shared output rules to a role prompt
macro_rules! with_output_rules {
    ($role:literal) => {
        concat!(
            $role,
            "\n\nRespond with a JSON report. Put every file you create or change in \
             `artifacts` with its full content. Report `coverage` (0.0-1.0) only if you \
             measured or estimated test coverage, `review_score` (0.0-1.0) only if you \
             reviewed work, and `verdict` (approve, request_changes, reject) only if you \
             are gating quality."
        )
    };
}

const ARCHITECTURE_PROMPT: &str = with_output_rules!("You are a software architect. Propose module \
boundaries, data flow and interfaces that fit the project's existing stack. Prefer \
small, well-named components.");

const CODING_PROMPT: &str = with_output_rules!("You are a senior engineer. Implement the requested \
change in the project's language and conventions. If a previous agent supplied a \
design, follow it.");

const REVIEW_PROMPT: &str = with_output_rules!("You are a code reviewer. Check the previous agent's \
work for correctness, clarity and consistency with the project. Give a verdict and \
a review_score.");

const TESTING_PROMPT: &str = with_output_rules!("You are a test engineer. Write tests for the previous \
agent's work using the project's test framework and estimate the coverage they give.");

const SECURITY_PROMPT: &str = with_output_rules!("You are a security auditor. Look for injection, \
authentication, secret handling and dependency risks in the work you are given. \
Reject work with exploitable issues.");

const PERFORMANCE_PROMPT: &str = with_output_rules!("You are a performance engineer. Identify hot paths, \
needless allocation and blocking calls, and propose concrete optimizations.");

const DOCUMENTATION_PROMPT: &str = with_output_rules!("You are a technical writer. Document the change \
for users and maintainers: README sections, API docs and examples.");

const DEPLOYMENT_PROMPT: &str = with_output_rules!("You are a release engineer. Produce build, packaging \
and deployment configuration for the change.");

const MONITORING_PROMPT: &str = with_output_rules!("You are an observability engineer. Add logging, \
metrics and alerts that make the change operable in production.");

const REFACTORING_PROMPT: &str = with_output_rules!("You are a refactoring specialist. Restructure the \
code for readability without changing behaviour.");

/// System prompt for a specialization
pub fn system_prompt(specialization: Specialization) -> &'static str {
    match specialization {
        Specialization::Architecture => ARCHITECTURE_PROMPT,
        Specialization::Coding => CODING_PROMPT,
        Specialization::Review => REVIEW_PROMPT,
        Specialization::Testing => TESTING_PROMPT,
        Specialization::Security => SECURITY_PROMPT,
        Specialization::Performance => PERFORMANCE_PROMPT,
        Specialization::Documentation => DOCUMENTATION_PROMPT,
        Specialization::Deployment => DEPLOYMENT_PROMPT,
        Specialization::Monitoring => MONITORING_PROMPT,
        Specialization::Refactoring => REFACTORING_PROMPT,
    }
}

/// One file proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ArtifactDraft {
    /// Relative path of the file
    pub name: String,
    /// Full file content
    pub content: String,
}

/// Structured report returned by the model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct LlmReport {
    /// What was done, in a few sentences
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDraft>,
    /// Estimated test coverage (0.0 - 1.0)
    #[serde(default)]
    pub coverage: Option<f64>,
    /// Review score (0.0 - 1.0)
    #[serde(default)]
    pub review_score: Option<f64>,
    /// "approve", "request_changes" or "reject"
    #[serde(default)]
    pub verdict: Option<String>,
}

impl LlmReport {
    fn parse_verdict(raw: &str) -> Option<Verdict> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "approve" | "approved" => Some(Verdict::Approve),
            "request_changes" | "needs_changes" | "changes_requested" => {
                Some(Verdict::RequestChanges)
            }
            "reject" | "rejected" => Some(Verdict::Reject),
            _ => None,
        }
    }

    pub fn into_output(self) -> AgentOutput {
        let mut output = AgentOutput::new(self.summary);
        for draft in self.artifacts {
            output = output.with_artifact(draft.name, draft.content);
        }
        if let Some(coverage) = self.coverage {
            output = output.with_metric("coverage", coverage);
        }
        if let Some(score) = self.review_score {
            output = output.with_metric("review_score", score);
        }
        output.verdict = self.verdict.as_deref().and_then(Self::parse_verdict);
        output
    }
}

/// Agent work driven by an LLM
#[derive(Debug, Clone)]
pub struct LlmWork {
    specialization: Specialization,
    config: ModelConfig,
}

impl LlmWork {
    pub fn new(specialization: Specialization, config: ModelConfig) -> Self {
        Self {
            specialization,
            config,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// User message: task, project snapshot and the handed-over result
    pub fn render_prompt(task: &AgentTask, context: &WorkContext) -> String {
        let project = serde_json::to_string_pretty(context.project.as_ref())
            .unwrap_or_else(|_| "{}".to_string());

        let mut prompt = format!(
            "Task: {}\nPhase: {}\nInstruction: {}\n\nDescription:\n{}\n\nProject:\n{}",
            task.task_name, task.phase, task.instruction, task.description, project
        );

        if let Some(previous) = &context.previous {
            let from = context.previous_agent.as_deref().unwrap_or("previous agent");
            prompt.push_str(&format!("\n\nResult from {}:\n{}", from, previous.summary));
            for (name, content) in &previous.artifacts {
                prompt.push_str(&format!("\n\n--- {} ---\n{}", name, content));
            }
        }
        prompt
    }
}

#[async_trait]
impl AgentWork for LlmWork {
    async fn execute(&self, task: &AgentTask, context: &WorkContext) -> anyhow::Result<AgentOutput> {
        let prompt = Self::render_prompt(task, context);
        let report = run_llm_function!(
            &self.config,
            LlmReport,
            system_prompt(self.specialization),
            prompt
        )?;
        Ok(report.into_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProjectContext;
    use std::sync::Arc;

    #[test]
    fn test_report_into_output() {
        let report = LlmReport {
            summary: "added tests".to_string(),
            artifacts: vec![ArtifactDraft {
                name: "tests/login.rs".to_string(),
                content: "#[test] fn ok() {}".to_string(),
            }],
            coverage: Some(0.85),
            review_score: None,
            verdict: Some("Request changes".to_string()),
        };

        let output = report.into_output();
        assert_eq!(output.summary, "added tests");
        assert!(output.artifacts.contains_key("tests/login.rs"));
        assert_eq!(output.metrics.get("coverage"), Some(&0.85));
        assert!(!output.metrics.contains_key("review_score"));
        assert_eq!(output.verdict, Some(Verdict::RequestChanges));
    }

    #[test]
    fn test_prompt_includes_handoff() {
        let task = AgentTask {
            task_id: "t1".to_string(),
            task_name: "login".to_string(),
            description: "Add a login endpoint".to_string(),
            phase: "Implementation".to_string(),
            instruction: "Implement the design".to_string(),
        };
        let context = WorkContext {
            execution_id: "exec-1".to_string(),
            project: Arc::new(ProjectContext::default()),
            previous: Some(AgentOutput::new("design ready").with_artifact("DESIGN.md", "layers")),
            previous_agent: Some("architect".to_string()),
        };

        let prompt = LlmWork::render_prompt(&task, &context);
        assert!(prompt.contains("Result from architect"));
        assert!(prompt.contains("--- DESIGN.md ---"));
        assert!(prompt.contains("Implement the design"));
    }

    #[test]
    fn test_every_specialization_has_prompt() {
        for skill in Specialization::all() {
            assert!(system_prompt(skill).contains("JSON report"));
        }
    }
}
