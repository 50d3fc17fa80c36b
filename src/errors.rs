// src/errors.rs

//! Crate-wide error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{AgentId, NodeId, SessionId};

/// Problems with the DAG itself. Always fatal at plan time, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("DAG contains no nodes")]
    Empty,

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: NodeId, dependency: NodeId },

    #[error("cycle detected in DAG involving node '{node}'")]
    CyclicDependency { node: NodeId },
}

/// A worker could not be created at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to spawn worker for node '{node}': {reason}")]
pub struct SpawnError {
    pub node: NodeId,
    pub reason: String,
}

impl SpawnError {
    pub fn new(node: impl Into<NodeId>, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum WavedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid DAG: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Agent '{agent}' not found in session '{session}'")]
    AgentNotFound { session: SessionId, agent: AgentId },

    #[error("Wave {wave} not found in session '{session}'")]
    WaveNotFound { session: SessionId, wave: usize },

    #[error("Session '{0}' already exists")]
    SessionExists(SessionId),

    #[error("Corrupted state file {path:?}: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WavedagError>;
