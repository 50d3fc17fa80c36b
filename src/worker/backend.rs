// src/worker/backend.rs

//! Seams between the lifecycle manager and the outside world.
//!
//! The manager never talks to processes or log files directly. It asks a
//! [`WorkerLauncher`] to start and stop workers and a [`StatusProbe`] to
//! classify them. Production uses [`super::ProcessLauncher`] and
//! [`super::OutputProbe`]; tests plug in scripted implementations.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::{Result, SpawnError};
use crate::types::{AgentId, NodeId, ProbeState, SessionId};

use super::WorkerHandle;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where and on whose behalf a worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    /// Per-agent directory the worker runs in and writes its log to.
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub node_id: NodeId,
    pub task: String,
    /// Shell command that starts the worker.
    pub cmd: String,
    pub worker_type: Option<String>,
    pub context: ExecutionContext,
}

pub trait WorkerLauncher: Send + Sync {
    /// Start a worker. Fails synchronously (no handle) if it cannot start.
    fn launch(&self, request: LaunchRequest) -> BoxFuture<'_, std::result::Result<WorkerHandle, SpawnError>>;

    /// Terminate a worker. Killing an already-finished worker is not an
    /// error.
    fn kill<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<()>>;
}

/// One observation of a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub state: ProbeState,
    /// Latest absolute cost reported by the worker, if any.
    pub cost: Option<f64>,
}

impl ProbeReport {
    pub fn new(state: ProbeState) -> Self {
        Self { state, cost: None }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

pub trait StatusProbe: Send + Sync {
    /// Classify the worker behind `handle`. Must be safe to call repeatedly.
    fn probe<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<ProbeReport>>;
}
