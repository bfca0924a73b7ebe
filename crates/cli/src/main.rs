//! Conductor CLI
//!
//! Runs workflows against a project and inspects stored runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::agents::create_roster;
use conductor_core::config::{ConductorConfig, DEFAULT_CONFIG_PATH};
use conductor_core::context::ManifestContextProvider;
use conductor_core::state::{RunStore, SqliteRunStore};
use conductor_core::swarm::{
    EventSink, Orchestrator, QualityRequirements, TimeConstraints, TracingEventSink,
};
use conductor_core::workflow::{execution_ids, IntentKind, WorkflowEngine, WorkflowOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Conductor - workflow and agent orchestration")]
struct Args {
    /// Config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a workflow for an intent
    Run {
        /// What should be done, e.g. "Add OAuth login"
        intent: String,
        /// Project root
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Intent kind instead of keyword classification (feature, bugfix, ...)
        #[arg(long)]
        kind: Option<String>,
        /// Minimum coverage reported by testing agents (0.0 - 1.0)
        #[arg(long)]
        min_coverage: Option<f64>,
        /// Minimum review score reported by review agents (0.0 - 1.0)
        #[arg(long)]
        min_review_score: Option<f64>,
        /// Add a security agent to QA
        #[arg(long)]
        security_review: bool,
        /// No QA phase on code-changing stages
        #[arg(long)]
        skip_qa: bool,
        /// Per-agent timeout in seconds
        #[arg(long)]
        agent_timeout: Option<u64>,
        /// Whole-workflow budget in seconds
        #[arg(long)]
        budget: Option<u64>,
    },
    /// List the agent roster
    Agents,
    /// List recent workflows
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// List orchestration executions instead of workflows
        #[arg(long)]
        executions: bool,
    },
    /// Print a stored workflow or execution as JSON
    Show {
        /// Workflow id (wf-...) or execution id (exec-...)
        id: String,
    },
}

fn load_config(path: &Path) -> Result<ConductorConfig> {
    let mut config = ConductorConfig::load(path)?;
    config.apply_env_overrides();
    Ok(config)
}

fn open_store(config: &ConductorConfig) -> Result<SqliteRunStore> {
    let path = config.database_path();
    SqliteRunStore::open_at(&path)
        .with_context(|| format!("Failed to open run store at {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
async fn run_workflow(
    config: ConductorConfig,
    intent: String,
    root: PathBuf,
    kind: Option<String>,
    quality: QualityRequirements,
    skip_qa: bool,
    agent_timeout: Option<u64>,
    budget: Option<u64>,
) -> Result<()> {
    let intent_kind = match kind {
        Some(name) => Some(
            IntentKind::parse(&name).with_context(|| format!("Unknown intent kind '{}'", name))?,
        ),
        None => None,
    };

    let registry = Arc::new(create_roster(&config.models)?);
    let store: Arc<dyn RunStore> = Arc::new(open_store(&config)?);
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let orchestrator = Orchestrator::new(
        registry,
        Arc::clone(&store),
        Arc::clone(&events),
        config.orchestrator.clone(),
    );
    let engine = WorkflowEngine::new(
        Arc::new(orchestrator),
        Arc::new(ManifestContextProvider::new(root)),
        store,
        events,
        config.workflow.clone(),
    );

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling workflow");
            cancel.cancel();
        }
    });

    let options = WorkflowOptions {
        intent_kind,
        quality,
        skip_qa,
        time_constraints: TimeConstraints {
            agent_timeout_ms: agent_timeout.map(|secs| secs * 1_000),
            total_budget_ms: None,
        },
        budget_secs: budget,
    };

    println!("🚀 Running workflow: {}", intent);
    match engine.start_workflow(&intent, options).await {
        Ok(workflow) => {
            println!("✅ Workflow {} completed", workflow.id);
            for stage in &workflow.stages {
                println!("   {} [{:?}]", stage.name, stage.status);
            }
            println!(
                "   Executions: {}",
                execution_ids(&workflow).collect::<Vec<_>>().join(", ")
            );
            for warning in &workflow.warnings {
                println!("   ⚠️ {} / {}: {}", warning.stage, warning.check, warning.message);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("❌ Workflow {} failed: {}", err.workflow.id, err.source);
            if let Some(report) = &err.workflow.failure {
                eprintln!("   Stage: {}", report.stage);
                if let Some(phase) = &report.phase {
                    eprintln!("   Phase: {}", phase);
                }
                if let Some(agent) = &report.agent_id {
                    eprintln!("   Agent: {}", agent);
                }
            }
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // API keys for the LLM providers
    let _ = dotenvy::from_path(".conductor/.env");
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command {
        CliCommand::Run {
            intent,
            root,
            kind,
            min_coverage,
            min_review_score,
            security_review,
            skip_qa,
            agent_timeout,
            budget,
        } => {
            let quality = QualityRequirements {
                min_coverage,
                min_review_score,
                security_review,
            };
            run_workflow(
                config,
                intent,
                root,
                kind,
                quality,
                skip_qa,
                agent_timeout,
                budget,
            )
            .await
        }
        CliCommand::Agents => {
            let registry = create_roster(&config.models)?;
            for agent in registry.list() {
                let model = config.models.model_for(agent.id());
                println!(
                    "{:<12} {:<14} {:?}/{}  [{}]",
                    agent.id(),
                    agent.specialization().as_str(),
                    model.provider,
                    model.model,
                    agent
                        .capabilities()
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Ok(())
        }
        CliCommand::History { limit, executions: true } => {
            let store = open_store(&config)?;
            for row in store.recent_executions(limit).await? {
                println!(
                    "{}  {:<10} {}  {}",
                    row.id, row.status, row.started_at, row.task_name
                );
            }
            Ok(())
        }
        CliCommand::History { limit, .. } => {
            let store = open_store(&config)?;
            let workflows = store.list_workflows(limit).await?;
            if workflows.is_empty() {
                println!("No workflows recorded yet");
            }
            for wf in workflows {
                println!(
                    "{}  {:<10} {}/{}  {}  {}",
                    wf.id, wf.status, wf.current_stage, wf.stage_count, wf.updated_at, wf.intent
                );
            }
            Ok(())
        }
        CliCommand::Show { id } => {
            let store = open_store(&config)?;
            let json = if id.starts_with("exec-") {
                let execution = store
                    .load_execution(&id)
                    .await?
                    .with_context(|| format!("No execution '{}'", id))?;
                serde_json::to_string_pretty(&execution)?
            } else {
                let workflow = store
                    .load_workflow(&id)
                    .await?
                    .with_context(|| format!("No workflow '{}'", id))?;
                serde_json::to_string_pretty(&workflow)?
            };
            println!("{}", json);
            Ok(())
        }
    }
}
