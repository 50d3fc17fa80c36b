// src/engine/runner.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::budget::BudgetGovernor;
use crate::config::DagFile;
use crate::dag::Wave;
use crate::errors::{Result, WavedagError};
use crate::state::{AgentStatus, NewSession, Session, SessionStatus, StateStore, WaveStatus};
use crate::types::SessionId;
use crate::worker::LifecycleManager;

use super::tick::Ticker;
use super::wave::{WaveExecution, WaveResolution};
use super::{RunMode, RunOutcome};

/// One invocation of `wavedag run`.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: SessionId,
    pub dag: DagFile,
    pub dag_path: Option<PathBuf>,
    pub mode: RunMode,
    /// Ceiling override. On an existing session this tops up (or lowers) the
    /// stored ceiling.
    pub budget: Option<f64>,
    pub max_concurrency: Option<usize>,
}

/// Requests a session abort from outside the runner (Ctrl-C).
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Drives a session wave by wave.
///
/// Waves run strictly in order. Within a wave, agents are started while the
/// budget allows and a concurrency slot is free; between polling rounds the
/// runner waits on its [`Ticker`] (or an abort request).
pub struct Runner<T: Ticker> {
    store: Arc<StateStore>,
    lifecycle: LifecycleManager,
    governor: BudgetGovernor,
    ticker: T,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
}

impl<T: Ticker> fmt::Debug for Runner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("store", &self.store)
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

/// Where a prepared run starts.
struct Prepared {
    start: usize,
    max_concurrency: usize,
}

impl<T: Ticker> Runner<T> {
    pub fn new(store: Arc<StateStore>, lifecycle: LifecycleManager, ticker: T) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        Self {
            store,
            lifecycle,
            governor: BudgetGovernor::new(),
            ticker,
            abort_tx: Arc::new(abort_tx),
            abort_rx,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort_tx),
        }
    }

    /// Run the session to an outcome.
    ///
    /// Errors are reserved for conditions that stop the run before it can
    /// reach an outcome (bad input, unreadable state).
    pub async fn run(&mut self, request: RunRequest) -> Result<RunOutcome> {
        let id = request.session_id.as_str();

        let Some(prepared) = self.prepare(&request)? else {
            info!(session_id = %id, "all waves already complete; nothing to do");
            return Ok(RunOutcome::Success);
        };

        let waves = request.dag.waves();
        info!(
            session_id = %id,
            start = prepared.start,
            waves = waves.len(),
            max_concurrency = prepared.max_concurrency,
            "run started"
        );

        for wave in &waves[prepared.start..] {
            let n = wave.wave_number;
            info!(session_id = %id, wave = n, nodes = ?wave.nodes, "wave started");

            let resolution = self
                .run_wave(&request.dag, id, wave, prepared.max_concurrency)
                .await?;

            match resolution {
                WaveResolution::Complete => {
                    self.store.update_wave_status(id, n, WaveStatus::Complete)?;
                    info!(session_id = %id, wave = n, "wave complete");
                }
                WaveResolution::Failed {
                    failed,
                    spawn_failed,
                    not_started,
                } => {
                    self.store.update_wave_status(id, n, WaveStatus::Failed)?;
                    self.store.set_session_status(id, SessionStatus::Failed)?;
                    error!(
                        session_id = %id,
                        wave = n,
                        ?failed,
                        ?spawn_failed,
                        ?not_started,
                        "wave failed; halting"
                    );
                    return Ok(RunOutcome::Failure);
                }
                WaveResolution::BudgetBlocked { blocked } => {
                    self.store.update_wave_status(id, n, WaveStatus::Failed)?;
                    self.store.set_session_status(id, SessionStatus::Paused)?;
                    warn!(
                        session_id = %id,
                        wave = n,
                        ?blocked,
                        "budget exhausted; session paused (raise --budget and rerun with --resume)"
                    );
                    return Ok(RunOutcome::BudgetExceeded);
                }
                WaveResolution::Aborted => {
                    self.store.update_wave_status(id, n, WaveStatus::Failed)?;
                    warn!(session_id = %id, wave = n, "run aborted");
                    return Ok(RunOutcome::Failure);
                }
            }
        }

        self.finish(id)?;
        info!(session_id = %id, "all waves complete");
        Ok(RunOutcome::Success)
    }

    /// Load or create the session, apply overrides, and reset the waves
    /// about to run. `None` means there is nothing left to run.
    fn prepare(&self, request: &RunRequest) -> Result<Option<Prepared>> {
        let id = request.session_id.as_str();
        let waves = request.dag.waves();

        if request.max_concurrency == Some(0) {
            return Err(WavedagError::ConfigError(
                "max concurrency must be at least 1".to_string(),
            ));
        }

        let session = match self.store.get_session(id) {
            Ok(session) => session,
            Err(WavedagError::SessionNotFound(_)) if request.mode == RunMode::Fresh => {
                self.create(request)?
            }
            Err(e) => return Err(e),
        };

        if session.dag_fingerprint != request.dag.fingerprint() {
            return Err(WavedagError::ConfigError(format!(
                "DAG for session '{id}' changed since the session was created; use a new session id"
            )));
        }

        let start = match request.mode {
            RunMode::Fresh => 0,
            RunMode::Resume => session.last_completed_wave().map_or(0, |w| w + 1),
            RunMode::FromWave(n) if n < waves.len() => n,
            RunMode::FromWave(n) => {
                return Err(WavedagError::ConfigError(format!(
                    "wave {n} does not exist (session has {} waves)",
                    waves.len()
                )));
            }
        };

        // Nodes in `start` may depend on any earlier wave.
        if let Some(unfinished) = session
            .waves
            .iter()
            .find(|w| w.wave_number < start && w.status != WaveStatus::Complete)
        {
            return Err(WavedagError::ConfigError(format!(
                "cannot start session '{id}' at wave {start}: wave {} is {}",
                unfinished.wave_number, unfinished.status
            )));
        }

        if let Some(budget) = request.budget {
            if session.budget.ceiling != Some(budget) {
                self.store.set_budget_ceiling(id, Some(budget))?;
            }
        }

        if start >= waves.len() {
            self.finish(id)?;
            return Ok(None);
        }

        if session.status == SessionStatus::Archived {
            self.store.reopen_session(id)?;
        }
        self.store.reap_orphans(id)?;
        self.store.reset_waves_from(id, start)?;
        self.store.set_session_status(id, SessionStatus::Active)?;

        Ok(Some(Prepared {
            start,
            max_concurrency: request.max_concurrency.unwrap_or(session.max_concurrency),
        }))
    }

    fn create(&self, request: &RunRequest) -> Result<Session> {
        let id = request.session_id.as_str();
        let settings = &request.dag.settings;

        self.store.create_session(NewSession {
            session_id: request.session_id.clone(),
            dag_path: request.dag_path.clone(),
            dag_fingerprint: request.dag.fingerprint(),
            budget_ceiling: request.budget.or(settings.budget_ceiling),
            warn_threshold: settings.warn_threshold,
            hard_stop_threshold: settings.hard_stop_threshold,
            max_concurrency: request.max_concurrency.unwrap_or(settings.max_concurrency),
        })?;
        for wave in request.dag.waves() {
            self.store.add_wave(id, wave.wave_number, wave.nodes.clone())?;
        }
        self.store.get_session(id)
    }

    /// Mark the session complete and archive it. Every wave must be complete.
    fn finish(&self, id: &str) -> Result<()> {
        let session = self.store.get_session(id)?;
        if let Some(unfinished) = session
            .waves
            .iter()
            .find(|w| w.status != WaveStatus::Complete)
        {
            return Err(WavedagError::InvalidTransition {
                entity: format!("session {id}"),
                from: format!("wave {} {}", unfinished.wave_number, unfinished.status),
                to: SessionStatus::Complete.to_string(),
            });
        }
        match session.status {
            SessionStatus::Archived => return Ok(()),
            SessionStatus::Active | SessionStatus::Complete => {}
            _ => self.store.set_session_status(id, SessionStatus::Active)?,
        }
        self.store.set_session_status(id, SessionStatus::Complete)?;
        self.store.archive_session(id)
    }

    async fn run_wave(
        &mut self,
        dag: &DagFile,
        id: &str,
        wave: &Wave,
        max_concurrency: usize,
    ) -> Result<WaveResolution> {
        self.store
            .update_wave_status(id, wave.wave_number, WaveStatus::Active)?;
        let mut exec = WaveExecution::new(wave.wave_number, wave.nodes.clone(), max_concurrency);

        loop {
            if self.abort_requested() && !exec.is_aborted() {
                self.lifecycle.abort_session(id).await?;
                exec.abort();
                for agent in exec.running_agents() {
                    exec.record_finished(&agent, AgentStatus::Killed);
                }
            }

            self.issue_spawns(dag, id, &mut exec).await?;
            if exec.is_settled() {
                break;
            }

            self.wait_for_tick().await;
            if self.abort_requested() {
                continue;
            }

            self.poll_running(id, &mut exec).await?;
        }

        debug!(
            session_id = %id,
            wave = exec.wave_number(),
            completed = ?exec.completed(),
            "wave settled"
        );
        Ok(exec.resolution())
    }

    async fn issue_spawns(&self, dag: &DagFile, id: &str, exec: &mut WaveExecution) -> Result<()> {
        while exec.wants_spawn() {
            let session = self.store.get_session(id)?;
            let allowed = self.governor.can_spawn(&session);
            let Some(node_id) = exec.next_spawn(allowed) else {
                break;
            };

            let node = dag.node(&node_id).ok_or_else(|| {
                WavedagError::ConfigError(format!("node '{node_id}' is missing from the DAG"))
            })?;

            match self.lifecycle.spawn(id, node, dag.command_for(node)).await {
                Ok(agent) => exec.record_spawned(node_id, agent.agent_id),
                Err(WavedagError::Spawn(_)) => exec.record_spawn_failed(node_id),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn poll_running(&self, id: &str, exec: &mut WaveExecution) -> Result<()> {
        for agent in exec.running_agents() {
            let status = self.lifecycle.poll(id, &agent).await?;
            exec.record_finished(&agent, status);
        }

        let assessment = self.governor.assess(&self.store.get_session(id)?);
        debug!(
            session_id = %id,
            running = exec.running_count(),
            ?assessment,
            "poll round done"
        );
        Ok(())
    }

    async fn wait_for_tick(&mut self) {
        tokio::select! {
            _ = self.ticker.tick() => {}
            _ = self.abort_rx.changed() => {}
        }
    }

    fn abort_requested(&self) -> bool {
        *self.abort_rx.borrow()
    }
}
