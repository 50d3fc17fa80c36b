// src/lib.rs

pub mod budget;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod state;
pub mod types;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, PlanArgs, RunArgs, StatusArgs};
use crate::config::{DagFile, load_and_validate, resolve_state_dir};
use crate::engine::{IntervalTicker, RunMode, RunOutcome, RunRequest, Runner};
use crate::errors::{Result, WavedagError};
use crate::state::{Session, StateStore};
use crate::worker::{LifecycleManager, LifecyclePolicy, OutputProbe, ProcessLauncher};

/// DAG file used when neither `--dag` nor the session names one.
pub const DEFAULT_DAG_FILE: &str = "Wavedag.toml";

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<RunOutcome> {
    let state_dir = resolve_state_dir(args.state_dir.as_deref());
    debug!(state_dir = ?state_dir, "resolved state directory");

    match args.command {
        Command::Run(run_args) => run_session(&state_dir, run_args).await,
        Command::Plan(plan_args) => plan(plan_args),
        Command::Status(status_args) => status(&state_dir, status_args),
    }
}

/// `wavedag run`: wires the store, process launcher, output probe and
/// runner together, plus Ctrl-C handling.
async fn run_session(state_dir: &Path, args: RunArgs) -> Result<RunOutcome> {
    let store = Arc::new(StateStore::on_disk(state_dir));

    let dag_path = resolve_dag_path(&store, &args);
    let dag = load_dag(&dag_path)?;

    let mode = match (args.resume, args.from_wave) {
        (true, _) => RunMode::Resume,
        (false, Some(n)) => RunMode::FromWave(n),
        (false, None) => RunMode::Fresh,
    };

    if let Some(budget) = args.budget {
        if !budget.is_finite() || budget < 0.0 {
            return Err(WavedagError::ConfigError(format!(
                "--budget must be a non-negative number (got {budget})"
            )));
        }
    }

    let probe = OutputProbe::from_worker(&dag.worker)?;
    let policy = LifecyclePolicy {
        idle_timeout: dag.settings.idle_timeout,
        probe_timeout: dag.settings.probe_timeout,
    };
    let lifecycle = LifecycleManager::new(
        Arc::clone(&store),
        Arc::new(ProcessLauncher::new()),
        Arc::new(probe),
        policy,
    );
    let ticker = IntervalTicker::new(dag.settings.poll_interval);
    let mut runner = Runner::new(store, lifecycle, ticker);

    // Ctrl-C → abort the session.
    {
        let abort = runner.abort_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!("Ctrl+C received; aborting session");
            abort.abort();
        });
    }

    let request = RunRequest {
        session_id: args.session_id,
        dag,
        dag_path: Some(std::fs::canonicalize(&dag_path).unwrap_or(dag_path)),
        mode,
        budget: args.budget,
        max_concurrency: args.max_concurrency.map(|n| n as usize),
    };

    let outcome = runner.run(request).await?;
    info!(%outcome, "run finished");
    Ok(outcome)
}

/// `--dag`, then the path recorded in an existing session, then the default.
fn resolve_dag_path(store: &StateStore, args: &RunArgs) -> PathBuf {
    if let Some(path) = &args.dag {
        return path.clone();
    }
    match store.get_session(&args.session_id) {
        Ok(Session {
            dag_path: Some(path),
            ..
        }) => path,
        _ => PathBuf::from(DEFAULT_DAG_FILE),
    }
}

/// Load and validate a DAG file. A file that cannot be read is reported as
/// a configuration problem.
fn load_dag(path: &Path) -> Result<DagFile> {
    load_and_validate(path).map_err(|e| match e {
        WavedagError::IoError(io) => {
            WavedagError::ConfigError(format!("reading DAG file {:?}: {io}", path))
        }
        other => other,
    })
}

/// `wavedag plan`: print waves without executing anything.
fn plan(args: PlanArgs) -> Result<RunOutcome> {
    let dag = load_dag(&args.dag)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(dag.waves())?);
        return Ok(RunOutcome::Success);
    }

    println!("wavedag plan: {}", args.dag.display());
    println!("  nodes = {}", dag.graph().len());
    match dag.settings.budget_ceiling {
        Some(ceiling) => println!("  budget_ceiling = {ceiling}"),
        None => println!("  budget_ceiling = unlimited"),
    }
    println!("  max_concurrency = {}", dag.settings.max_concurrency);
    println!();

    for wave in dag.waves() {
        println!("wave {}:", wave.wave_number);
        for id in &wave.nodes {
            let Some(node) = dag.node(id) else { continue };
            println!("  - {id}");
            if !node.dependencies.is_empty() {
                println!("      after: {:?}", node.dependencies);
            }
            if let Some(worker_type) = &node.worker_type {
                println!("      worker_type: {worker_type}");
            }
            println!("      cmd: {}", dag.command_for(node));
        }
    }

    debug!("plan complete (no execution)");
    Ok(RunOutcome::Success)
}

/// `wavedag status`: print one session, or list all of them.
fn status(state_dir: &Path, args: StatusArgs) -> Result<RunOutcome> {
    let store = StateStore::on_disk(state_dir);

    let Some(id) = args.session_id else {
        for id in store.list_sessions()? {
            let session = store.get_session(&id)?;
            println!("{id}\t{}", session.status);
        }
        return Ok(RunOutcome::Success);
    };

    let session = store.get_session(&id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(RunOutcome::Success);
    }

    println!("session {} ({})", session.session_id, session.status);
    match session.budget.ceiling {
        Some(ceiling) => println!("  cost: {:.2} / {:.2}", session.budget.accumulated, ceiling),
        None => println!("  cost: {:.2} (no ceiling)", session.budget.accumulated),
    }
    for wave in &session.waves {
        println!("wave {} [{}]", wave.wave_number, wave.status);
        for agent in session.agents_in_wave(wave.wave_number) {
            let mut line = format!(
                "  - {} {} [{}] cost {:.2}",
                agent.node_id, agent.agent_id, agent.status, agent.cost
            );
            if let Some(reason) = agent.kill_reason {
                line.push_str(&format!(" ({reason})"));
            }
            if let Some(err) = &agent.error {
                line.push_str(&format!(" error: {err}"));
            }
            println!("{line}");
        }
    }
    Ok(RunOutcome::Success)
}
