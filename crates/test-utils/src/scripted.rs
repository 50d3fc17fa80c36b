//! Scripted stand-ins for the worker launcher and status probe.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wavedag::errors::{Result, SpawnError, WavedagError};
use wavedag::types::{NodeId, ProbeState};
use wavedag::worker::{
    BoxFuture, LaunchRequest, ProbeReport, StatusProbe, WorkerHandle, WorkerLauncher,
};

/// One scripted probe answer.
#[derive(Debug, Clone)]
pub enum ProbeStep {
    Report(ProbeReport),
    /// Never answer; exercises the probe timeout.
    Hang,
    Error(String),
}

pub fn active() -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Active))
}

pub fn idle() -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Idle))
}

pub fn complete() -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Complete))
}

pub fn failed() -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Failed))
}

pub fn complete_with_cost(cost: f64) -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Complete).with_cost(cost))
}

pub fn active_with_cost(cost: f64) -> ProbeStep {
    ProbeStep::Report(ProbeReport::new(ProbeState::Active).with_cost(cost))
}

#[derive(Debug, Default)]
struct Inner {
    scripts: HashMap<NodeId, VecDeque<ProbeStep>>,
    fail_launch: HashSet<NodeId>,
    launched: Vec<LaunchRequest>,
    killed: Vec<String>,
    live: BTreeSet<String>,
    max_live: usize,
}

/// Fake workers: implements both [`WorkerLauncher`] and [`StatusProbe`].
///
/// - Probe answers are scripted per node. Each probe consumes one step; the
///   last step repeats forever. Nodes without a script complete at the first
///   probe.
/// - Launches for nodes registered with [`ScriptedWorkers::fail_launch`]
///   return a `SpawnError`.
/// - Tracks how many workers are live at once (launched and not yet
///   complete, failed or killed).
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorkers {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<I>(&self, node: &str, steps: I) -> &Self
    where
        I: IntoIterator<Item = ProbeStep>,
    {
        self.inner
            .lock()
            .scripts
            .insert(node.to_string(), steps.into_iter().collect());
        self
    }

    pub fn fail_launch(&self, node: &str) -> &Self {
        self.inner.lock().fail_launch.insert(node.to_string());
        self
    }

    /// Node ids in launch order.
    pub fn launched(&self) -> Vec<NodeId> {
        self.inner
            .lock()
            .launched
            .iter()
            .map(|r| r.node_id.clone())
            .collect()
    }

    pub fn launch_requests(&self) -> Vec<LaunchRequest> {
        self.inner.lock().launched.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.inner.lock().killed.clone()
    }

    pub fn max_live(&self) -> usize {
        self.inner.lock().max_live
    }

    fn next_step(&self, node: &str) -> ProbeStep {
        let mut inner = self.inner.lock();
        match inner.scripts.get_mut(node) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or_else(complete),
            Some(steps) => steps.front().cloned().unwrap_or_else(complete),
            None => complete(),
        }
    }
}

impl WorkerLauncher for ScriptedWorkers {
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> BoxFuture<'_, std::result::Result<WorkerHandle, SpawnError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if inner.fail_launch.contains(&request.node_id) {
                return Err(SpawnError::new(
                    request.node_id.clone(),
                    "scripted launch failure",
                ));
            }
            let handle =
                WorkerHandle::detached(request.context.agent_id.clone(), request.node_id.clone());
            inner.live.insert(handle.worker_id.clone());
            inner.max_live = inner.max_live.max(inner.live.len());
            inner.launched.push(request);
            Ok(handle)
        })
    }

    fn kill<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            inner.live.remove(&handle.worker_id);
            inner.killed.push(handle.worker_id.clone());
            Ok(())
        })
    }
}

impl StatusProbe for ScriptedWorkers {
    fn probe<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<ProbeReport>> {
        Box::pin(async move {
            match self.next_step(&handle.node_id) {
                ProbeStep::Report(report) => {
                    if matches!(report.state, ProbeState::Complete | ProbeState::Failed) {
                        self.inner.lock().live.remove(&handle.worker_id);
                    }
                    Ok(report)
                }
                ProbeStep::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ProbeReport::new(ProbeState::Active))
                }
                ProbeStep::Error(msg) => Err(WavedagError::ConfigError(msg)),
            }
        })
    }
}
