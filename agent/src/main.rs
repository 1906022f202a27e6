//! LLM-driven container build agent.
//!
//! `build-agent run <repo_url>` hands a chat model the repository URL and lets
//! it drive clone, index, Dockerfile synthesis and build until it exits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use build_agent::actions::{Backends, standard_registry};
use build_agent::core::chunk::TextSplitter;
use build_agent::core::history::History;
use build_agent::exit_codes;
use build_agent::io::audit_log::AuditLog;
use build_agent::io::config::{AgentConfig, ConfigOverrides, DEFAULT_CONFIG_FILE, load_config};
use build_agent::io::docker::DockerCliBuilder;
use build_agent::io::embeddings::OpenAiEmbedder;
use build_agent::io::git::GitCloner;
use build_agent::io::human::ConsoleConfirm;
use build_agent::io::llm::OpenAiChat;
use build_agent::io::prompt::PromptEngine;
use build_agent::io::qdrant::QdrantIndex;
use build_agent::io::usage_log::UsageLog;
use build_agent::logging;
use build_agent::looping::{ControlLoop, LoopEvent, LoopOutcome, LoopParts, LoopStop};

#[derive(Parser)]
#[command(
    name = "build-agent",
    version,
    about = "LLM-driven agent that clones a repository and builds a container image for it"
)]
struct Cli {
    /// TOML config file; missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the model until it exits or sends a malformed reply.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Repository to containerize.
    repo_url: String,

    /// Container build service endpoint.
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,
    /// Qdrant REST endpoint.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,
    /// Chat model identifier.
    #[arg(long, env = "MODEL")]
    model: Option<String>,
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,
    /// Consecutive failed builds before asking a human.
    #[arg(long, env = "QUOTA_FAILS")]
    max_build_failures: Option<u32>,
    /// Tokens consumed before asking a human.
    #[arg(long, env = "QUOTA_TOKENS")]
    token_quota: Option<u64>,
    /// Where repositories are cloned.
    #[arg(long, env = "WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,
    /// Where `actions.log` and `usage.log` are written.
    #[arg(long, env = "BUILD_LOGS")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            docker_host: self.docker_host.clone(),
            qdrant_url: self.qdrant_url.clone(),
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            openai_base_url: self.openai_base_url.clone(),
            max_build_failures: self.max_build_failures,
            token_quota: self.token_quota,
            workspace_dir: self.workspace_dir.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&cli.config, args),
    }
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let Some(api_key) = args
        .openai_api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
    else {
        eprintln!("OPENAI_API_KEY missing");
        return Ok(exit_codes::INVALID);
    };
    let config = load_config(config_path)?
        .with_overrides(&args.overrides())
        .context("apply overrides")?;

    let outcome = drive(&config, api_key, &args.repo_url)?;
    println!(
        "turns={} escalations={} tokens={}",
        outcome.turns, outcome.escalations, outcome.tokens
    );
    Ok(match outcome.stop {
        LoopStop::Exited => exit_codes::OK,
        LoopStop::MalformedDirective { .. } => exit_codes::MALFORMED,
    })
}

fn drive(config: &AgentConfig, api_key: &str, repo_url: &str) -> Result<LoopOutcome> {
    let timeout = config.request_timeout();
    let model = OpenAiChat::new(
        &config.openai_base_url,
        api_key,
        &config.model,
        config.temperature,
        timeout,
    )?;
    let embedder = OpenAiEmbedder::new(
        &config.openai_base_url,
        api_key,
        &config.embedding_model,
        timeout,
    )?;
    let index = QdrantIndex::new(
        embedder,
        TextSplitter::new(config.chunk_size, config.chunk_overlap),
        timeout,
    )?;
    let cloner = GitCloner::new(config.build_timeout(), config.output_limit_bytes);
    let builder = DockerCliBuilder::new(config.build_timeout(), config.output_limit_bytes);
    let human = ConsoleConfirm;

    let registry = standard_registry(
        Backends {
            model: &model,
            cloner: &cloner,
            index: &index,
            builder: &builder,
            human: &human,
        },
        &config.workspace_dir,
    )?;
    let system = PromptEngine::new().render_system(config.max_build_failures, config.token_quota)?;
    let mut control = ControlLoop::new(
        LoopParts {
            model: &model,
            human: &human,
            registry,
            audit: AuditLog::new(config.actions_log_path()),
            usage_log: UsageLog::new(config.usage_log_path()),
            shared: config.shared_context(),
            token_quota: config.token_quota,
            max_build_failures: config.max_build_failures,
        },
        History::seeded(system, repo_url),
    )?;
    control.run(print_event)
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::Activity { line } => println!("{line}"),
        LoopEvent::Escalated { reason, answer, .. } => {
            println!("escalated ({reason:?}), human answered '{answer}'");
        }
        LoopEvent::MalformedReply { reply, error } => {
            eprintln!("Bad JSON from LLM: {error}");
            eprintln!("{reply}");
        }
    }
}
