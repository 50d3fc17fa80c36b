// src/state/model.rs

//! Persisted session record and the state machines for sessions, waves and
//! agents.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, NodeId, SessionId};
use crate::worker::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planning,
    Active,
    Paused,
    Complete,
    Failed,
    Archived,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Planning, Active)
                | (Planning, Failed)
                | (Active, Paused)
                | (Active, Complete)
                | (Active, Failed)
                | (Paused, Active)
                | (Paused, Failed)
                | (Paused, Archived)
                | (Failed, Active)
                | (Failed, Archived)
                | (Complete, Active)
                | (Complete, Archived)
                | (Archived, Active)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

impl WaveStatus {
    /// Transitions allowed through `update_wave_status`. Going back to
    /// `Pending` only happens through an explicit wave reset.
    pub fn can_transition_to(self, next: WaveStatus) -> bool {
        use WaveStatus::*;
        matches!(
            (self, next),
            (Pending, Active) | (Active, Complete) | (Active, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WaveStatus::Complete | WaveStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Recorded but not (yet) running. A failed spawn leaves the agent here.
    Pending,
    Active,
    Complete,
    /// The worker reported an error.
    Failed,
    /// The worker was terminated by the orchestrator.
    Killed,
}

impl AgentStatus {
    /// `Active -> Active` is allowed and refreshes `last_updated`.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Active)
                | (Active, Complete)
                | (Active, Failed)
                | (Active, Killed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Complete | AgentStatus::Failed | AgentStatus::Killed
        )
    }
}

/// Why an agent ended up `killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    IdleTimeout,
    SessionAbort,
    /// Left `active` by a control process that went away.
    Orphaned,
}

macro_rules! impl_display_via_serde {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    match serde_json::to_value(self) {
                        Ok(serde_json::Value::String(s)) => f.write_str(&s),
                        _ => write!(f, "{:?}", self),
                    }
                }
            }
        )*
    };
}

impl_display_via_serde!(SessionStatus, WaveStatus, AgentStatus, KillReason);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    /// `None` means no ceiling.
    pub ceiling: Option<f64>,
    pub accumulated: f64,
    pub warn_threshold: f64,
    pub hard_stop_threshold: f64,
}

impl BudgetRecord {
    /// Accumulated cost at which spawning stops.
    pub fn hard_limit(&self) -> Option<f64> {
        self.ceiling.map(|c| c * self.hard_stop_threshold)
    }

    pub fn warn_limit(&self) -> Option<f64> {
        self.ceiling.map(|c| c * self.warn_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveRecord {
    pub wave_number: usize,
    pub status: WaveStatus,
    pub node_ids: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub node_id: NodeId,
    pub wave_number: usize,
    #[serde(default)]
    pub worker_type: Option<String>,
    pub status: AgentStatus,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub handle: Option<WorkerHandle>,
    #[serde(default)]
    pub kill_reason: Option<KillReason>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The whole persisted record of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub dag_path: Option<PathBuf>,
    pub dag_fingerprint: String,
    pub budget: BudgetRecord,
    pub max_concurrency: usize,
    pub waves: Vec<WaveRecord>,
    pub agents: BTreeMap<AgentId, AgentRecord>,
}

impl Session {
    pub fn wave(&self, wave_number: usize) -> Option<&WaveRecord> {
        self.waves.get(wave_number)
    }

    /// Wave that contains `node`, if any.
    pub fn wave_of(&self, node: &str) -> Option<&WaveRecord> {
        self.waves
            .iter()
            .find(|w| w.node_ids.iter().any(|n| n == node))
    }

    /// Sum of the latest cost reported by every agent.
    pub fn agent_cost_total(&self) -> f64 {
        self.agents.values().map(|a| a.cost).sum()
    }

    /// Highest wave index whose status is `complete`.
    pub fn last_completed_wave(&self) -> Option<usize> {
        self.waves
            .iter()
            .filter(|w| w.status == WaveStatus::Complete)
            .map(|w| w.wave_number)
            .max()
    }

    pub fn agents_in_wave(&self, wave_number: usize) -> impl Iterator<Item = &AgentRecord> {
        self.agents
            .values()
            .filter(move |a| a.wave_number == wave_number)
    }
}

/// Everything needed to create a new session record.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: SessionId,
    pub dag_path: Option<PathBuf>,
    pub dag_fingerprint: String,
    pub budget_ceiling: Option<f64>,
    pub warn_threshold: f64,
    pub hard_stop_threshold: f64,
    pub max_concurrency: usize,
}
