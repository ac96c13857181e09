use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor::conductor_config::CliOverrides;
use conductor::config::Config;
use conductor::logging::{self, LogOptions};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Run task workflows through sequential, resumable phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit stderr logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Retries after the original attempt. Overrides conductor.toml.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Seconds between retries. Overrides conductor.toml.
    #[arg(long, global = true)]
    pub retry_delay_secs: Option<u64>,

    /// Per-phase timeout in minutes. Overrides conductor.toml.
    #[arg(long, global = true)]
    pub timeout_minutes: Option<u64>,

    /// Fail on the first phase failure instead of retrying
    #[arg(long, global = true)]
    pub no_recovery: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session and run every phase
    Execute {
        task_id: String,
        /// JSON object, or a project path
        context: Option<String>,
    },
    /// Continue a session from its resume point (or from a given phase)
    Resume {
        session_id: String,
        from: Option<u32>,
    },
    /// Show a session (defaults to the most recent one)
    Status { session_id: Option<String> },
    /// Run a contiguous range of phases
    Phase {
        start: u32,
        end: u32,
        /// JSON object, or a project path
        context: Option<String>,
        /// Run against an existing session instead of creating one
        #[arg(long)]
        session: Option<String>,
    },
    /// List persisted sessions, newest first
    Sessions,
    /// Delete sessions and artifacts older than the retention window
    Prune {
        #[arg(long)]
        days: Option<u32>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show file and effective configuration
    Show,
    /// Validate configuration and the phase pipeline
    Validate,
    /// Write a default conductor.toml
    Init,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            max_retries: self.max_retries,
            retry_delay_secs: self.retry_delay_secs,
            timeout_minutes: self.timeout_minutes,
            no_recovery: self.no_recovery,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
        Err(err) => err.exit(),
    };

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "Command failed");
            let body = serde_json::json!({ "status": "error", "error": format!("{:#}", err) });
            println!("{}", body);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose, cli.overrides())?;

    let _log_guard = logging::init(LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: Some(config.log_dir.clone()),
    })?;

    match &cli.command {
        Commands::Execute { task_id, context } => {
            cmd::cmd_execute(&config, task_id, context.as_deref()).await
        }
        Commands::Resume { session_id, from } => cmd::cmd_resume(&config, session_id, *from).await,
        Commands::Status { session_id } => cmd::cmd_status(&config, session_id.as_deref()),
        Commands::Phase {
            start,
            end,
            context,
            session,
        } => cmd::cmd_phase(&config, *start, *end, context.as_deref(), session.as_deref()).await,
        Commands::Sessions => cmd::cmd_sessions(&config),
        Commands::Prune { days } => cmd::cmd_prune(&config, *days),
        Commands::Config { command } => cmd::cmd_config(&config, command.clone()),
    }
}
