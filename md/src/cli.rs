//! Command-line interface for the `md` binary

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use tracing::info;

use crate::agent::{AgentExecutor, AgentRegistry};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::darwin::DarwinSelector;
use crate::domain::{MissionStatus, PatternDefinition, Project, WorkflowTemplate, Wsjf};
use crate::events::EventStream;
use crate::guard::{DeterministicGuard, SemanticReviewer};
use crate::llm::LlmGateway;
use crate::memory::MemoryManager;
use crate::orchestrator::Orchestrator;
use crate::pattern::PatternEngine;
use crate::state::StateManager;
use crate::tools::ToolRunner;

/// missiond - multi-agent mission orchestration daemon
#[derive(Parser)]
#[command(name = "md", version, about)]
pub struct Cli {
    /// Path to a config file (default: .missiond.yml, then user config)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding agent/pattern/workflow/project definitions
    #[arg(short, long, global = true, default_value = ".missiond")]
    pub definitions: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon: recover missions and serve until interrupted
    Serve,

    /// Mission operations
    #[command(subcommand)]
    Mission(MissionCommand),
}

#[derive(Subcommand)]
pub enum MissionCommand {
    /// Create a mission against a project and workflow
    Create {
        #[arg(long)]
        project: String,
        #[arg(long)]
        workflow: String,
        #[arg(long, default_value_t = 5)]
        business_value: i64,
        #[arg(long, default_value_t = 5)]
        time_criticality: i64,
        #[arg(long, default_value_t = 3)]
        risk_reduction: i64,
        #[arg(long, default_value_t = 5)]
        job_duration: i64,
        /// Start driving it immediately
        #[arg(long)]
        start: bool,
    },
    /// Start a queued mission
    Start { mission_id: String },
    /// Pause a running mission
    Pause { mission_id: String },
    /// Resume a paused mission
    Resume { mission_id: String },
    /// Decide a pending checkpoint
    Approve {
        mission_id: String,
        checkpoint_id: String,
        #[arg(long)]
        reject: bool,
    },
    /// Show one mission's full status
    Show { mission_id: String },
    /// List missions
    List {
        #[arg(long)]
        status: Option<String>,
    },
}

/// Wire the application root from config and definition files
pub fn build_orchestrator(config: Config, definitions_dir: &std::path::Path) -> Result<Arc<Orchestrator>> {
    let state = StateManager::spawn(&config.storage.store_dir)?;
    let events = Arc::new(EventStream::new(state.clone()));
    let memory = MemoryManager::new(state.clone(), events.clone());
    let gateway = Arc::new(LlmGateway::from_config(&config.llm));

    let runner = Arc::new(
        ToolRunner::standard(
            std::time::Duration::from_secs(config.tools.default_timeout_s),
            std::time::Duration::from_secs(config.tools.android_timeout_s),
        )
        .with_state(state.clone()),
    );

    let bus = MessageBus::new(config.bus.inbox_capacity).with_state(state.clone());
    let bus_handle = bus.handle();
    tokio::spawn(bus.run());

    // Escalations from agent turns land in the orchestrator's inbox
    let escalation_inbox = bus_handle.clone();
    tokio::spawn(async move {
        let _ = escalation_inbox.register("orchestrator").await;
    });

    let executor = Arc::new(AgentExecutor::new(
        gateway.clone(),
        runner,
        memory.clone(),
        bus_handle,
        events.clone(),
        state.clone(),
        config.executor.clone(),
    ));

    let engine = PatternEngine::new(
        executor,
        memory.clone(),
        events.clone(),
        DeterministicGuard::new(&config.guard),
        SemanticReviewer::new(gateway.clone(), &config.guard),
        config.pattern.clone(),
        state.clone(),
    );

    let darwin = DarwinSelector::new(state.clone(), events.clone(), config.darwin.clone());

    let mut registry = AgentRegistry::new();
    registry.load_dir(definitions_dir.join("agents"))?;

    let mut orchestrator = Orchestrator::new(config, state, events, memory, darwin, engine, gateway, registry);

    for workflow in load_definitions::<WorkflowTemplate>(&definitions_dir.join("workflows"))? {
        orchestrator.register_workflow(workflow);
    }
    for pattern in load_definitions::<PatternDefinition>(&definitions_dir.join("patterns"))? {
        orchestrator.register_pattern(pattern);
    }
    for project in load_definitions::<Project>(&definitions_dir.join("projects"))? {
        orchestrator.register_project(project);
    }

    Ok(Arc::new(orchestrator))
}

fn load_definitions<T: serde::de::DeserializeOwned>(dir: &std::path::Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir).context(format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yml" || e == "yaml")
            .unwrap_or(false);
        if is_yaml {
            let content = std::fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
            let parsed: T = serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))?;
            out.push(parsed);
        }
    }
    Ok(out)
}

/// Run a parsed CLI invocation
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_ref())?;
    let orchestrator = build_orchestrator(config, &cli.definitions)?;

    match cli.command {
        Command::Serve => {
            let stats = orchestrator.recover().await.map_err(|e| eyre::eyre!("{}", e))?;
            info!(%stats, "Daemon up");
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down");
        }
        Command::Mission(mission_command) => match mission_command {
            MissionCommand::Create {
                project,
                workflow,
                business_value,
                time_criticality,
                risk_reduction,
                job_duration,
                start,
            } => {
                let wsjf = Wsjf {
                    business_value,
                    time_criticality,
                    risk_reduction,
                    job_duration,
                };
                let mission_id = orchestrator
                    .create_mission(&project, &workflow, wsjf)
                    .await
                    .map_err(|e| eyre::eyre!("{}", e))?;
                println!("{}", mission_id);
                if start {
                    let handle = orchestrator.start_mission(&mission_id);
                    handle.await?;
                }
            }
            MissionCommand::Start { mission_id } => {
                let handle = orchestrator.start_mission(&mission_id);
                handle.await?;
            }
            MissionCommand::Pause { mission_id } => {
                orchestrator.pause_mission(&mission_id).await.map_err(|e| eyre::eyre!("{}", e))?;
            }
            MissionCommand::Resume { mission_id } => {
                let handle = orchestrator.resume_mission(&mission_id);
                handle.await?;
            }
            MissionCommand::Approve {
                mission_id,
                checkpoint_id,
                reject,
            } => {
                orchestrator
                    .approve_checkpoint(&mission_id, &checkpoint_id, !reject)
                    .await
                    .map_err(|e| eyre::eyre!("{}", e))?;
            }
            MissionCommand::Show { mission_id } => {
                let view = orchestrator.get_mission(&mission_id).await.map_err(|e| eyre::eyre!("{}", e))?;
                println!("{}", serde_json::to_string_pretty(&view)?);
            }
            MissionCommand::List { status } => {
                let status = match status.as_deref() {
                    Some(s) => Some(
                        MissionStatus::parse(s).ok_or_else(|| eyre::eyre!("unknown status {}", s))?,
                    ),
                    None => None,
                };
                let views = orchestrator.list_missions(status, 50, 0).await.map_err(|e| eyre::eyre!("{}", e))?;
                for view in views {
                    println!("{}  {}  phase {} sprint {}", view.id, view.status, view.phase_index, view.sprint);
                }
            }
        },
    }

    Ok(())
}
