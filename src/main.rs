use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use dealflow::providers::SampleDataSource;
use dealflow::storage::InMemoryStore;
use dealflow::{Config, DefaultAgentFactory, Orchestrator, PropertyData, UserId, WorkflowSnapshot};

#[derive(Parser)]
#[command(name = "dealflow")]
#[command(about = "Multi-agent property deal analysis", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis pipeline on a property file (JSON or YAML)
    Analyze {
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        user_id: UserId,
    },
    /// Print every agent's status
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.log_filter);

    match cli.command {
        Commands::Analyze { file, user_id } => analyze(&config, &file, user_id).await,
        Commands::Agents => agents(&config).await,
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(config: &Config, store: &InMemoryStore) -> Result<Orchestrator> {
    let factory = DefaultAgentFactory::new(
        Arc::new(SampleDataSource::new()),
        config.llm.text_generator()?,
        config.retry.policy(),
        config.llm.max_tokens,
    );

    Ok(Orchestrator::new(
        factory,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config.orchestrator.clone(),
    ))
}

fn read_property(path: &Path) -> Result<PropertyData> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let data: PropertyData = if yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing YAML {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing JSON {}", path.display()))?
    };

    if !data.is_object() {
        bail!("{} must contain a single property object", path.display());
    }
    Ok(data)
}

async fn analyze(config: &Config, file: &Path, user_id: UserId) -> Result<()> {
    let property = read_property(file)?;
    let store = InMemoryStore::new();
    let orchestrator = build_orchestrator(config, &store)?;
    orchestrator.startup().await?;

    let workflow_id = orchestrator.submit_analysis_request(property, user_id)?;
    let outcome = wait_for_terminal(&orchestrator, workflow_id).await;
    orchestrator.shutdown().await?;
    let workflow = outcome?;

    let record = match workflow.analysis_id {
        Some(id) => store.get_analysis_record(id)?,
        None => None,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "workflow": workflow, "analysis": record }))?
    );

    if let Some(error) = &workflow.error {
        bail!("analysis failed: {}", error);
    }
    Ok(())
}

async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    workflow_id: dealflow::WorkflowId,
) -> Result<WorkflowSnapshot> {
    loop {
        if let Some(workflow) = orchestrator.get_workflow_status(&workflow_id) {
            if workflow.status.is_terminal() {
                return Ok(workflow);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = tokio::signal::ctrl_c() => bail!("interrupted"),
        }
    }
}

async fn agents(config: &Config) -> Result<()> {
    let store = InMemoryStore::new();
    let orchestrator = build_orchestrator(config, &store)?;
    orchestrator.startup().await?;

    let report = orchestrator.get_agent_status(None);
    println!("{}", serde_json::to_string_pretty(&report)?);

    orchestrator.shutdown().await?;
    Ok(())
}
