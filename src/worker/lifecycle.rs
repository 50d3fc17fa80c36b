// src/worker/lifecycle.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::elapsed_between;
use crate::dag::Node;
use crate::errors::{Result, WavedagError};
use crate::state::{AgentRecord, AgentStatus, KillReason, SessionStatus, StateStore};
use crate::types::{AgentId, ProbeState};

use super::backend::{ExecutionContext, LaunchRequest, ProbeReport, StatusProbe, WorkerLauncher};

const WORKERS_DIR: &str = "workers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// An agent that shows no activity for longer than this is killed.
    pub idle_timeout: Duration,
    /// Upper bound for one probe call. Overrunning counts as `idle`.
    pub probe_timeout: Duration,
}

/// Drives agents through `pending -> active -> {complete, failed, killed}`.
///
/// Every transition goes through the [`StateStore`] before the call
/// returns.
pub struct LifecycleManager {
    store: Arc<StateStore>,
    launcher: Arc<dyn WorkerLauncher>,
    probe: Arc<dyn StatusProbe>,
    policy: LifecyclePolicy,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<StateStore>,
        launcher: Arc<dyn WorkerLauncher>,
        probe: Arc<dyn StatusProbe>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            launcher,
            probe,
            policy,
        }
    }

    /// Per-agent working directory: `<state>/workers/<session>/<agent>`.
    pub fn workdir_for(&self, session_id: &str, agent_id: &str) -> PathBuf {
        self.store
            .root()
            .join(WORKERS_DIR)
            .join(session_id)
            .join(agent_id)
    }

    /// Start a worker for `node`.
    ///
    /// On launch failure the agent stays `pending` with the error recorded,
    /// and `WavedagError::Spawn` is returned.
    pub async fn spawn(&self, session_id: &str, node: &Node, cmd: &str) -> Result<AgentRecord> {
        let agent = self
            .store
            .add_agent(session_id, &node.id, node.worker_type.clone())?;

        let request = LaunchRequest {
            node_id: node.id.clone(),
            task: node.task.clone(),
            cmd: cmd.to_string(),
            worker_type: node.worker_type.clone(),
            context: ExecutionContext {
                session_id: session_id.to_string(),
                agent_id: agent.agent_id.clone(),
                workdir: self.workdir_for(session_id, &agent.agent_id),
            },
        };

        match self.launcher.launch(request).await {
            Ok(handle) => {
                let agent = self
                    .store
                    .set_agent_handle(session_id, &agent.agent_id, handle)?;
                info!(
                    session_id = %session_id,
                    node = %node.id,
                    agent_id = %agent.agent_id,
                    "agent started"
                );
                Ok(agent)
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    node = %node.id,
                    agent_id = %agent.agent_id,
                    error = %e,
                    "agent failed to start"
                );
                self.store
                    .record_spawn_failure(session_id, &agent.agent_id, &e.reason)?;
                Err(WavedagError::Spawn(e))
            }
        }
    }

    /// Probe one agent and apply the result. Returns the agent's status
    /// afterwards.
    pub async fn poll(&self, session_id: &str, agent_id: &str) -> Result<AgentStatus> {
        let agent = self.store.get_agent(session_id, agent_id)?;
        if agent.status != AgentStatus::Active {
            return Ok(agent.status);
        }

        let report = self.observe(&agent).await;

        if let Some(cost) = report.cost {
            let total = self.store.update_agent_cost(session_id, agent_id, cost)?;
            debug!(agent_id = %agent_id, cost, session_total = total, "cost recorded");
        }

        let updated = match report.state {
            ProbeState::Active => {
                self.store
                    .update_agent_status(session_id, agent_id, AgentStatus::Active, None)?
                    .status
            }
            ProbeState::Complete => {
                info!(session_id = %session_id, node = %agent.node_id, agent_id = %agent_id, "agent complete");
                self.store
                    .update_agent_status(session_id, agent_id, AgentStatus::Complete, None)?
                    .status
            }
            ProbeState::Failed => {
                warn!(session_id = %session_id, node = %agent.node_id, agent_id = %agent_id, "agent failed");
                self.store
                    .update_agent_status(session_id, agent_id, AgentStatus::Failed, None)?
                    .status
            }
            ProbeState::Idle => self.check_idle(session_id, &agent).await?,
        };
        Ok(updated)
    }

    /// Kill every `active` agent and mark the session `failed`. Returns the
    /// ids of the agents that were killed.
    pub async fn abort_session(&self, session_id: &str) -> Result<Vec<AgentId>> {
        let mut killed = Vec::new();
        for agent in self.store.list_agents(session_id)? {
            if agent.status != AgentStatus::Active {
                continue;
            }
            self.kill_worker(&agent).await;
            self.store.update_agent_status(
                session_id,
                &agent.agent_id,
                AgentStatus::Killed,
                Some(KillReason::SessionAbort),
            )?;
            killed.push(agent.agent_id);
        }

        let session = self.store.get_session(session_id)?;
        if session.status.can_transition_to(SessionStatus::Failed) {
            self.store
                .set_session_status(session_id, SessionStatus::Failed)?;
        }
        warn!(session_id = %session_id, killed = killed.len(), "session aborted");
        Ok(killed)
    }

    async fn observe(&self, agent: &AgentRecord) -> ProbeReport {
        let Some(handle) = agent.handle.as_ref() else {
            warn!(agent_id = %agent.agent_id, "active agent has no worker handle");
            return ProbeReport::new(ProbeState::Idle);
        };

        match tokio::time::timeout(self.policy.probe_timeout, self.probe.probe(handle)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(agent_id = %agent.agent_id, error = %e, "status probe failed; treating as idle");
                ProbeReport::new(ProbeState::Idle)
            }
            Err(_) => {
                warn!(
                    agent_id = %agent.agent_id,
                    timeout = ?self.policy.probe_timeout,
                    "status probe timed out; treating as idle"
                );
                ProbeReport::new(ProbeState::Idle)
            }
        }
    }

    async fn check_idle(&self, session_id: &str, agent: &AgentRecord) -> Result<AgentStatus> {
        let idle_for = elapsed_between(agent.last_updated, self.store.clock().now());
        if idle_for <= self.policy.idle_timeout {
            debug!(agent_id = %agent.agent_id, ?idle_for, "agent idle");
            return Ok(AgentStatus::Active);
        }

        warn!(
            session_id = %session_id,
            node = %agent.node_id,
            agent_id = %agent.agent_id,
            ?idle_for,
            "agent idle past timeout; killing"
        );
        self.kill_worker(agent).await;
        let record = self.store.update_agent_status(
            session_id,
            &agent.agent_id,
            AgentStatus::Killed,
            Some(KillReason::IdleTimeout),
        )?;
        Ok(record.status)
    }

    async fn kill_worker(&self, agent: &AgentRecord) {
        if let Some(handle) = agent.handle.as_ref() {
            if let Err(e) = self.launcher.kill(handle).await {
                warn!(agent_id = %agent.agent_id, error = %e, "failed to kill worker");
            }
        }
    }
}
