// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dag::{DagGraph, Node, Wave};
use crate::types::NodeId;

/// Top-level DAG file as read from disk (TOML, or JSON for `.json` files).
///
/// ```toml
/// [config]
/// budget_ceiling = 25.0
/// max_concurrency = 4
/// idle_timeout = "15m"
///
/// [worker]
/// cmd = "my-agent --task \"$WAVEDAG_TASK\""
///
/// [node.A]
/// task = "write the schema"
///
/// [node.B]
/// task = "write the migrations"
/// dependencies = ["A"]
///
/// [[edge]]
/// from = "A"
/// to = "B"
/// ```
///
/// All sections except `node` are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDagFile {
    #[serde(default)]
    pub config: OrchestratorSection,

    #[serde(default)]
    pub worker: WorkerSection,

    /// Per worker-type overrides, keyed by the `worker_type` used on nodes.
    #[serde(default)]
    pub worker_types: BTreeMap<String, WorkerTypeSection>,

    /// All nodes from `[node.<id>]` (or `"nodes": {...}` in JSON).
    #[serde(default, alias = "nodes")]
    pub node: BTreeMap<NodeId, NodeConfig>,

    /// Explicit edge list; redundant with `dependencies` but merged into them.
    #[serde(default, alias = "edges")]
    pub edge: Vec<EdgeConfig>,
}

/// `[config]` section: orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum accumulated cost for a session. Absent means unlimited.
    #[serde(default)]
    pub budget_ceiling: Option<f64>,

    /// Fraction of the ceiling at which a warning is logged.
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,

    /// Fraction of the ceiling at which spawning stops.
    #[serde(default = "default_hard_stop_threshold")]
    pub hard_stop_threshold: f64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// Upper bound for a single status probe call.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

fn default_warn_threshold() -> f64 {
    0.7
}

fn default_hard_stop_threshold() -> f64 {
    1.0
}

fn default_max_concurrency() -> usize {
    4
}

fn default_poll_interval() -> String {
    "30s".to_string()
}

fn default_idle_timeout() -> String {
    "15m".to_string()
}

fn default_probe_timeout() -> String {
    "10s".to_string()
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            budget_ceiling: None,
            warn_threshold: default_warn_threshold(),
            hard_stop_threshold: default_hard_stop_threshold(),
            max_concurrency: default_max_concurrency(),
            poll_interval: default_poll_interval(),
            idle_timeout: default_idle_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// `[worker]` section: default launch command and output patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Shell command used to start a worker. The node's task is passed in
    /// the `WAVEDAG_TASK` environment variable.
    #[serde(default = "default_worker_cmd")]
    pub cmd: String,

    /// Regex with one capture group holding a status word
    /// (`active`/`idle`/`complete`/`failed`).
    #[serde(default)]
    pub status_pattern: Option<String>,

    /// Regex marking the worker as finished successfully.
    #[serde(default)]
    pub complete_pattern: Option<String>,

    /// Regex marking the worker as failed.
    #[serde(default)]
    pub failed_pattern: Option<String>,

    /// Regex with one capture group holding the worker's total cost.
    #[serde(default)]
    pub cost_pattern: Option<String>,
}

fn default_worker_cmd() -> String {
    "echo \"$WAVEDAG_TASK\"".to_string()
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            cmd: default_worker_cmd(),
            status_pattern: None,
            complete_pattern: None,
            failed_pattern: None,
            cost_pattern: None,
        }
    }
}

/// `[worker_types.<name>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTypeSection {
    pub cmd: String,
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub task: String,

    #[serde(default, alias = "after")]
    pub dependencies: Vec<NodeId>,

    #[serde(default)]
    pub worker_type: Option<String>,
}

/// `[[edge]]` entry: `to` cannot start until `from` is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: NodeId,
    pub to: NodeId,
}

/// Orchestration settings with durations parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub budget_ceiling: Option<f64>,
    pub warn_threshold: f64,
    pub hard_stop_threshold: f64,
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            budget_ceiling: None,
            warn_threshold: default_warn_threshold(),
            hard_stop_threshold: default_hard_stop_threshold(),
            max_concurrency: default_max_concurrency(),
            poll_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(15 * 60),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// A validated DAG file: the graph is known to be acyclic and its waves have
/// been planned.
///
/// Only constructed through `TryFrom<RawDagFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct DagFile {
    pub settings: OrchestratorSettings,
    pub worker: WorkerSection,
    pub worker_types: BTreeMap<String, WorkerTypeSection>,
    graph: DagGraph,
    waves: Vec<Wave>,
}

impl DagFile {
    pub(crate) fn new_unchecked(
        settings: OrchestratorSettings,
        worker: WorkerSection,
        worker_types: BTreeMap<String, WorkerTypeSection>,
        graph: DagGraph,
        waves: Vec<Wave>,
    ) -> Self {
        Self {
            settings,
            worker,
            worker_types,
            graph,
            waves,
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.node(id)
    }

    /// Launch command for a node: its worker type's command if one is
    /// configured, otherwise the default `[worker].cmd`.
    pub fn command_for(&self, node: &Node) -> &str {
        node.worker_type
            .as_deref()
            .and_then(|t| self.worker_types.get(t))
            .map(|t| t.cmd.as_str())
            .unwrap_or(self.worker.cmd.as_str())
    }

    /// Stable fingerprint of the node set, used to detect a DAG that changed
    /// underneath an existing session.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for node in self.graph.nodes() {
            hasher.update(node.id.as_bytes());
            hasher.update(&[0]);
            hasher.update(node.task.as_bytes());
            hasher.update(&[0]);
            for dep in node.dependencies.iter() {
                hasher.update(dep.as_bytes());
                hasher.update(&[1]);
            }
            hasher.update(node.worker_type.as_deref().unwrap_or("").as_bytes());
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex().to_string()
    }
}
