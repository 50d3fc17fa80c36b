// src/worker/handle.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Externally visible reference to a running worker.
///
/// Persisted with the agent record so a later control process can still
/// probe or kill the worker. Fields other than the ids are only set by
/// launchers that back a worker with a real process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub worker_id: String,
    pub node_id: NodeId,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub exit_path: Option<PathBuf>,
}

impl WorkerHandle {
    /// Handle with no process or files attached.
    pub fn detached(worker_id: impl Into<String>, node_id: impl Into<NodeId>) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_id: node_id.into(),
            pid: None,
            workdir: None,
            log_path: None,
            exit_path: None,
        }
    }
}
