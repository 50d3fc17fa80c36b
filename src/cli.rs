// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::RunOutcome;

/// Command-line arguments for `wavedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "wavedag",
    version,
    about = "Run a DAG of agent tasks wave by wave under a budget.",
    long_about = None
)]
pub struct CliArgs {
    /// Directory holding session state.
    ///
    /// If omitted, `WAVEDAG_STATE_DIR` or `.wavedag` is used.
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WAVEDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run (or continue) a session.
    Run(RunArgs),
    /// Validate a DAG file and print its waves without executing anything.
    Plan(PlanArgs),
    /// Show a persisted session, or list sessions when no id is given.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Session identifier. A new session is created on first use.
    pub session_id: String,

    /// DAG file (TOML, or JSON for `.json`).
    ///
    /// Defaults to the path recorded in the session, then `Wavedag.toml`.
    #[arg(long, value_name = "PATH")]
    pub dag: Option<PathBuf>,

    /// Continue after the last completed wave.
    #[arg(long, conflicts_with = "from_wave")]
    pub resume: bool,

    /// Restart at wave N; it and every later wave are reset.
    #[arg(long, value_name = "N")]
    pub from_wave: Option<usize>,

    /// Budget ceiling. On an existing session this replaces the stored one.
    #[arg(long, value_name = "AMOUNT")]
    pub budget: Option<f64>,

    /// Maximum number of agents running at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_concurrency: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// DAG file (TOML, or JSON for `.json`).
    #[arg(value_name = "PATH", default_value = "Wavedag.toml")]
    pub dag: PathBuf,

    /// Print the waves as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    pub session_id: Option<String>,

    /// Print the raw session record as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse the process arguments.
///
/// Help and version output exit 0. Any other usage error exits with the
/// fatal-config code; 2 is reserved for budget exhaustion.
pub fn parse() -> CliArgs {
    match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let Some(code) = usage_error_code(&err) else {
                err.exit();
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

/// Exit code for a rejected command line, or `None` for help/version output.
pub fn usage_error_code(err: &clap::Error) -> Option<i32> {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => None,
        _ => Some(RunOutcome::FatalConfigError.exit_code()),
    }
}
