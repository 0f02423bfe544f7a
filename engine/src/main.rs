use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gatehouse_core::{EventBus, TaskContext, ToolPermissions};
use gatehouse_providers::{ProviderRegistry, ProvidersConfig};
use gatehouse_scheduler::{ScheduleStore, Scheduler, TaskDispatcher};
use gatehouse_skills::{ProviderAgent, SkillRegistry, SkillTool, WorkflowRunner};
use gatehouse_tools::ToolRegistry;
use gatehouse_types::{ScheduledTask, Skill, SkillType};

#[derive(Parser, Debug)]
#[command(name = "gatehouse-engine")]
#[command(about = "Self-hosted agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway: load skills, sync schedules, tick until ctrl-c.
    Serve {
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Run a single skill interactively and print its output.
    Run {
        skill: String,
        /// Skill variables as name=value pairs.
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        #[arg(long)]
        request: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// List loaded skills.
    Skills {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct EngineConfig {
    #[serde(flatten)]
    providers: ProvidersConfig,
    #[serde(default)]
    skill_dirs: Vec<String>,
}

struct EngineState {
    bus: EventBus,
    skills: SkillRegistry,
    runner: WorkflowRunner,
    scheduler: Scheduler,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let state = build_state(&state_dir).await?;
            info!(state_dir = %state_dir.display(), "gatehouse engine started");
            state.scheduler.start();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("shutting down");
            state.scheduler.stop().await;
            state.bus.close();
        }
        Command::Run {
            skill,
            vars,
            request,
            state_dir,
        } => {
            let state = build_state(&resolve_state_dir(state_dir)).await?;
            let found = state
                .skills
                .get(&skill)
                .with_context(|| format!("skill `{skill}` is not loaded"))?;
            let mut inputs = parse_vars(&vars)?;
            if let Some(request) = request {
                inputs.insert("request".to_string(), request);
            }
            let ctx = TaskContext::interactive(format!("cli_{}", uuid::Uuid::new_v4().simple()));
            let output = state.runner.run_skill(&found, inputs, &ctx).await?;
            println!("{output}");
        }
        Command::Skills { state_dir } => {
            let state = build_state(&resolve_state_dir(state_dir)).await?;
            for skill in state.skills.all() {
                let kind = match skill.kind() {
                    SkillType::Simple => "simple",
                    SkillType::Workflow => "workflow",
                };
                println!("{:<24} {:<9} {}", skill.name, kind, skill.description);
            }
        }
    }

    Ok(())
}

async fn build_state(state_dir: &Path) -> anyhow::Result<EngineState> {
    let config = load_config(state_dir)?;

    let bus = EventBus::new();
    let permissions = ToolPermissions::new();
    let tools = ToolRegistry::new(bus.clone(), permissions.clone());
    let providers = ProviderRegistry::new(config.providers.clone());
    let agent = Arc::new(ProviderAgent::new(providers));
    let runner = WorkflowRunner::new(agent, tools.clone(), bus.clone());

    let skills = SkillRegistry::new();
    let mut skill_dirs: Vec<PathBuf> =
        config.skill_dirs.iter().map(PathBuf::from).collect();
    if skill_dirs.is_empty() {
        skill_dirs.push(state_dir.join("skills"));
    }
    for dir in &skill_dirs {
        let loaded = skills.load_dir(dir)?;
        if loaded > 0 {
            info!(dir = %dir.display(), count = loaded, "loaded skills");
        }
    }

    // Delegation-enabled skills double as callable tools.
    for skill in skills.all() {
        if skill.triggers.delegation {
            tools
                .register_plugin_tool("skills", Arc::new(SkillTool::new(skill, runner.clone())))
                .await;
        }
    }

    let store = ScheduleStore::new(state_dir.join("schedules"))?;
    let dispatcher = Arc::new(SkillDispatcher {
        skills: skills.clone(),
        runner: runner.clone(),
    });
    let scheduler = Scheduler::new(store, bus.clone(), dispatcher);
    let tracked = scheduler.load_entries().await?;
    info!(entries = tracked, "loaded schedule entries");
    scheduler
        .sync_skill_entries(skills.skill_schedule_entries())
        .await?;

    Ok(EngineState {
        bus,
        skills,
        runner,
        scheduler,
    })
}

/// Routes a fired task to its skill, or runs the task template's
/// description as an ad-hoc simple skill for dynamic entries.
struct SkillDispatcher {
    skills: SkillRegistry,
    runner: WorkflowRunner,
}

#[async_trait]
impl TaskDispatcher for SkillDispatcher {
    async fn dispatch(&self, task: ScheduledTask, ctx: TaskContext) -> anyhow::Result<String> {
        let inputs: HashMap<String, String> = task.env.clone().into_iter().collect();
        if let Some(name) = &task.skill_name {
            let skill = self
                .skills
                .get(name)
                .with_context(|| format!("scheduled skill `{name}` is not loaded"))?;
            return Ok(self.runner.run_skill(&skill, inputs, &ctx).await?);
        }
        if task.description.trim().is_empty() {
            anyhow::bail!("task {} has no skill and no description", task.task_id);
        }
        let ad_hoc = Skill {
            name: format!("task-{}", task.entry_id),
            description: task.title.clone(),
            skill_type: Some(SkillType::Simple),
            version: None,
            model: None,
            instruction: Some(task.description.clone()),
            tools: task.tools.clone(),
            triggers: Default::default(),
            vars: Default::default(),
            steps: Vec::new(),
        };
        Ok(self.runner.run_skill(&ad_hoc, inputs, &ctx).await?)
    }
}

fn load_config(state_dir: &Path) -> anyhow::Result<EngineConfig> {
    let path = state_dir.join("config.json");
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("GATEHOUSE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".gatehouse"))
        .unwrap_or_else(|| PathBuf::from(".gatehouse"))
}

fn parse_vars(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            warn!(var = %pair, "ignoring malformed --var (expected NAME=VALUE)");
            continue;
        };
        vars.insert(name.trim().to_string(), value.to_string());
    }
    Ok(vars)
}
