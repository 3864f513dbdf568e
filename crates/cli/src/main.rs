//! missionctl - operator CLI for the mission orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mission_core::{
    AgentId, AgentProfile, CircuitBreaker, Mission, MissionId, MissionStatus, Task, TaskFilter,
    TaskId,
};
use mission_execution::{CommandGateway, EngineConfig, EngineSettings, Orchestrator};
use mission_guardrails::{Action, LevelChange, LevelEvaluator, PermissionEngine};
use mission_progress::{derive_metrics, BasicProgressTracker, ProgressTracker};
use mission_proof::{GitChangeCapture, ProofService};
use mission_storage::{JsonStorage, Storage, WebhookApprovalSink};

const INSTANCE_FILE: &str = "instance_id";
/// How often `run` looks for rows written by other processes.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "missionctl")]
#[command(about = "Mission orchestration engine", long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(long, global = true, default_value = ".missions")]
    storage: PathBuf,

    /// Engine settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator
    Run {
        /// One tick, then wait for in-flight runs
        #[arg(long)]
        once: bool,
        /// Shell command that executes an agent run
        #[arg(long)]
        agent_command: String,
        /// POST approval requests here
        #[arg(long)]
        approval_webhook: Option<String>,
        /// Repository to capture changes in and run agents from
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Override the run budget
        #[arg(long)]
        max_runs: Option<usize>,
        /// Override the tick period in seconds
        #[arg(long)]
        tick_secs: Option<u64>,
    },
    /// Show missions and their progress
    Status,
    /// Reset tasks whose runs were lost
    Recover,
    /// Evaluate a permission
    Permission {
        /// Agent ID
        agent: String,
        /// Action, e.g. task:execute
        action: String,
        /// Task domains
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
    /// Assess a task's proof block
    Proof {
        /// Task ID
        task: String,
    },
    /// Evaluate level changes for every agent
    Levels,
    /// Register an agent
    AddAgent {
        /// Agent ID
        id: String,
        /// Autonomy level (1-4)
        #[arg(long, default_value = "2")]
        level: u8,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Create a mission
    AddMission {
        /// Mission ID
        id: String,
        /// Title
        title: String,
        /// continue, stop_phase or stop_mission
        #[arg(long, default_value = "continue")]
        breaker: String,
        /// Initial status
        #[arg(long, default_value = "scheduled")]
        status: String,
    },
    /// Create a task
    AddTask {
        /// Title
        title: String,
        /// Mission ID; a standalone mission when omitted
        #[arg(long)]
        mission: Option<String>,
        /// Executing agent
        #[arg(long)]
        agent: Option<String>,
        /// Reviewing agent
        #[arg(long)]
        reviewer: Option<String>,
        /// Tasks that must finish first
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Instructions
        #[arg(long, default_value = "")]
        input: String,
        /// Review rounds before the task fails (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_revisions: u32,
        /// Task domains
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let storage = Arc::new(
        JsonStorage::new(&cli.storage)
            .await
            .with_context(|| format!("opening storage at {}", cli.storage.display()))?,
    );

    match cli.command {
        Commands::Run {
            once,
            agent_command,
            approval_webhook,
            repo,
            max_runs,
            tick_secs,
        } => {
            let mut config = engine_config(cli.config.as_deref(), &cli.storage).await?;
            if let Some(max) = max_runs {
                config = config.with_max_concurrent_runs(max);
            }
            if let Some(secs) = tick_secs {
                config = config.with_tick_interval(Duration::from_secs(secs));
            }
            if config.max_concurrent_runs == 0 || config.tick_interval.is_zero() {
                bail!("run budget and tick period must be at least 1");
            }

            let (tx, mut rx) = mpsc::channel(256);
            let mut gateway = CommandGateway::new(agent_command, tx);
            let mut proof = ProofService::default();
            if let Some(repo) = &repo {
                gateway = gateway.with_workdir(repo);
                proof = proof.with_capture(Arc::new(GitChangeCapture::new(repo)));
            }

            let mut builder = Orchestrator::builder(storage.clone(), Arc::new(gateway))
                .with_proof(proof)
                .with_config(config);
            if let Some(url) = approval_webhook {
                builder = builder.with_approval_sink(Arc::new(WebhookApprovalSink::new(url)));
            }
            let engine = builder.build();

            if once {
                let report = engine.run_once(&mut rx).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let watcher = storage.spawn_watcher(WATCH_INTERVAL);
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Listening for ctrl-c failed: {}", e);
                    }
                };
                engine.run(rx, shutdown).await?;
                watcher.abort();
            }
        }
        Commands::Status => {
            let tracker = BasicProgressTracker::new(storage);
            let snapshot = tracker.snapshot().await?;

            println!("Missions ({})", snapshot.missions.len());
            for m in snapshot.missions {
                println!(
                    "  {} | {} | {} | {}/{} ({:.0}%) - {}",
                    m.mission_id,
                    m.stored_status.map(|s| s.as_str()).unwrap_or("-"),
                    m.derived_status.map(|s| s.as_str()).unwrap_or("-"),
                    m.progress.done,
                    m.progress.total,
                    m.progress.percentage(),
                    m.title.as_deref().unwrap_or("(no mission row)"),
                );
            }
        }
        Commands::Recover => {
            let config = engine_config(cli.config.as_deref(), &cli.storage).await?;
            let (tx, _rx) = mpsc::channel(1);
            let gateway = CommandGateway::new("true", tx);
            let engine = Orchestrator::builder(storage, Arc::new(gateway))
                .with_config(config)
                .build();
            let recovered = engine.recover().await?;
            println!("Recovered {} tasks", recovered);
        }
        Commands::Permission {
            agent,
            action,
            domains,
        } => {
            let action: Action = action.parse().map_err(anyhow::Error::msg)?;
            let Some(profile) = storage.load_agent(&AgentId::from(agent.as_str())).await? else {
                bail!("Unknown agent {}", agent);
            };
            let check = PermissionEngine::new().check(&profile, action, &domains);
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
        Commands::Proof { task } => {
            let Some(task) = storage.load_task(&TaskId::from(task.as_str())).await? else {
                bail!("Task not found");
            };
            let output = task.output_text.as_deref().unwrap_or_default();
            let assessment = ProofService::default().assess(&task, output);
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Levels => {
            let agents = storage.list_agents().await?;
            let tasks = storage.list_tasks(&TaskFilter::default()).await?;
            let evaluator = LevelEvaluator::new();
            let now = chrono::Utc::now();

            for agent in agents {
                let metrics = derive_metrics(&agent, &tasks, now);
                let verdict = match evaluator.evaluate(agent.level, &metrics) {
                    LevelChange::Promote { to } => format!("promote to {}", to.get()),
                    LevelChange::Demote { to, reasons } => {
                        format!("demote to {} ({})", to.get(), reasons.join("; "))
                    }
                    LevelChange::Hold => "hold".to_string(),
                };
                println!(
                    "  {} | level {} | {} done, review {:.2} - {}",
                    agent.id,
                    agent.level.get(),
                    metrics.tasks_completed,
                    metrics.avg_review_score,
                    verdict
                );
            }
        }
        Commands::AddAgent { id, level, name } => {
            let mut agent = AgentProfile::new(id.as_str(), level);
            if let Some(name) = name {
                agent.name = name;
            }
            storage.save_agent(&agent).await?;
            println!("Added agent: {} (level {})", agent.id, agent.level.get());
        }
        Commands::AddMission {
            id,
            title,
            breaker,
            status,
        } => {
            let mut mission = Mission::new(MissionId::from(id.as_str()), title)
                .with_circuit_breaker(parse_breaker(&breaker)?);
            mission.status = parse_mission_status(&status)?;
            storage.save_mission(&mission).await?;
            println!("Added mission: {} - {}", mission.id, mission.title);
        }
        Commands::AddTask {
            title,
            mission,
            agent,
            reviewer,
            depends_on,
            input,
            max_revisions,
            domains,
        } => {
            let mut task = match mission {
                Some(mission) => Task::new(&MissionId::from(mission.as_str()), title),
                None => Task::standalone(title),
            };
            if let Some(agent) = agent {
                task = task.with_agent(agent.as_str());
            }
            if let Some(reviewer) = reviewer {
                task = task.with_reviewer(reviewer.as_str());
            }
            task = task
                .with_dependencies(depends_on.iter().map(|d| TaskId::from(d.as_str())).collect())
                .with_input(input);
            task.max_revisions = max_revisions;
            task.domains = domains;

            storage.save_task(&task).await?;
            println!("Added task: {} - {} (mission {})", task.id, task.title, task.mission_id());
        }
    }

    Ok(())
}

/// Defaults, then the settings file, then the persisted instance id.
async fn engine_config(settings: Option<&Path>, storage_dir: &Path) -> Result<EngineConfig> {
    let settings = match settings {
        Some(path) => EngineSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };
    let mut config = EngineConfig::default();
    if settings.instance_id.is_none() {
        config.instance_id = instance_id(storage_dir).await?;
    }
    let config = settings.apply(config)?;
    info!("Instance {}:{}", config.claim_prefix, config.instance_id);
    Ok(config)
}

/// Instance id stored next to the data, created on first use.
async fn instance_id(storage_dir: &Path) -> Result<String> {
    let path = storage_dir.join(INSTANCE_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Ok(_) => write_instance_id(&path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => write_instance_id(&path).await,
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

async fn write_instance_id(path: &Path) -> Result<String> {
    let id = ulid::Ulid::new().to_string().to_lowercase();
    tokio::fs::write(path, &id)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(id)
}

fn parse_breaker(s: &str) -> Result<CircuitBreaker> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "continue" => Ok(CircuitBreaker::Continue),
        "stop_phase" => Ok(CircuitBreaker::StopPhase),
        "stop_mission" => Ok(CircuitBreaker::StopMission),
        other => bail!("unknown circuit breaker: {}", other),
    }
}

fn parse_mission_status(s: &str) -> Result<MissionStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .with_context(|| format!("unknown mission status: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instance_id_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let first = instance_id(dir.path()).await.unwrap();
        let second = instance_id(dir.path()).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.contains(':'));
    }

    #[tokio::test]
    async fn settings_file_wins_over_persisted_identity() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("engine.json");
        std::fs::write(&settings, r#"{"instance_id": "alpha", "max_concurrent_runs": 2}"#).unwrap();

        let config = engine_config(Some(&settings), dir.path()).await.unwrap();
        assert_eq!(config.instance_id, "alpha");
        assert_eq!(config.max_concurrent_runs, 2);
        assert!(!dir.path().join(INSTANCE_FILE).exists());
    }

    #[test]
    fn breaker_names() {
        assert_eq!(parse_breaker("stop-phase").unwrap(), CircuitBreaker::StopPhase);
        assert_eq!(parse_breaker("STOP_MISSION").unwrap(), CircuitBreaker::StopMission);
        assert!(parse_breaker("halt").is_err());
    }

    #[test]
    fn mission_status_names() {
        assert_eq!(parse_mission_status("in_progress").unwrap(), MissionStatus::InProgress);
        assert!(parse_mission_status("paused").is_err());
    }
}
