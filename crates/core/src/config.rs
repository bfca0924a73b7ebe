//! # Configuration
//!
//! Runtime settings for the orchestrator, the workflow engine and the
//! LLM-backed agents. Stored as JSON at `.conductor/config.json`; every field
//! is optional in the file and falls back to its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{LlmProvider, ModelConfig};

/// Default location of the config file
pub const DEFAULT_CONFIG_PATH: &str = ".conductor/config.json";

/// What a parallel phase does after its join when some agents failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParallelFailurePolicy {
    /// Record the failures and let the orchestration continue
    #[default]
    Continue,
    /// Fail the phase with the first failed agent
    Abort,
}

/// How in-flight agent tasks are treated when an execution is cancelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Let running agents finish within the grace period, then abandon them
    Drain { grace_ms: u64 },
    /// Abandon running agents immediately
    Abort,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self::Drain { grace_ms: 5_000 }
    }
}

impl CancellationPolicy {
    /// Time in-flight agents are given once cancellation is observed
    pub fn grace(&self) -> Duration {
        match self {
            Self::Drain { grace_ms } => Duration::from_millis(*grace_ms),
            Self::Abort => Duration::ZERO,
        }
    }
}

/// Behaviour when no agent matches a task's primary skill
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAgentPolicy {
    /// Fail with a selection error
    #[default]
    Fail,
    /// Fall back to the first registered candidate
    FirstRegistered,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub parallel_failure_policy: ParallelFailurePolicy,
    pub cancellation: CancellationPolicy,
    pub default_agent_policy: DefaultAgentPolicy,
    /// Budget for one agent invocation when the task does not set one
    pub default_agent_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel_failure_policy: ParallelFailurePolicy::Continue,
            cancellation: CancellationPolicy::default(),
            default_agent_policy: DefaultAgentPolicy::Fail,
            default_agent_timeout_secs: 300,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.default_agent_timeout_secs)
    }
}

/// Workflow engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Budget for a single pre-flight or post-flight check
    pub check_timeout_secs: u64,
    /// Wall-clock budget for a whole workflow (none = unbounded)
    pub workflow_budget_secs: Option<u64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 30,
            workflow_budget_secs: None,
        }
    }
}

impl WorkflowConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// Model selection for LLM-backed agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelSettings {
    pub global_provider: LlmProvider,
    pub global_model: Option<String>,
    /// Base URL override (OpenAI-compatible endpoints only)
    pub base_url: Option<String>,
    /// agent_id -> model name
    pub per_agent_models: HashMap<String, String>,
    /// agent_id -> provider
    pub per_agent_providers: HashMap<String, LlmProvider>,
    /// agent_id -> base_url
    pub per_agent_base_urls: HashMap<String, String>,
}

impl ModelSettings {
    /// Resolve the model for one agent: per-agent override, then global, then
    /// the provider default.
    pub fn model_for(&self, agent_id: &str) -> ModelConfig {
        let provider = self
            .per_agent_providers
            .get(agent_id)
            .copied()
            .unwrap_or(self.global_provider);

        let model = self
            .per_agent_models
            .get(agent_id)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.per_agent_base_urls
                .get(agent_id)
                .or(self.base_url.as_ref())
                .cloned()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ConductorConfig {
    pub orchestrator: OrchestratorConfig,
    pub workflow: WorkflowConfig,
    pub models: ModelSettings,
    /// Path of the SQLite run store
    pub database_path: Option<PathBuf>,
}

impl ConductorConfig {
    /// Load from a JSON file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply `CONDUCTOR_PROVIDER` / `CONDUCTOR_MODEL` overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("CONDUCTOR_PROVIDER") {
            match LlmProvider::parse(&name) {
                Some(provider) => self.models.global_provider = provider,
                None => tracing::warn!(provider = %name, "Ignoring unknown CONDUCTOR_PROVIDER"),
            }
        }
        if let Ok(model) = std::env::var("CONDUCTOR_MODEL") {
            if !model.is_empty() {
                self.models.global_model = Some(model);
            }
        }
    }

    /// Database path, defaulting to `.conductor/conductor.db`
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".conductor/conductor.db"))
    }
}
