use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical node id type used throughout the crate.
pub type NodeId = String;

/// Opaque session identifier chosen by the operator.
pub type SessionId = String;

/// Agent identifier (a uuid v4 rendered as a string).
pub type AgentId = String;

/// Classification of a live worker as reported by a status probe.
///
/// - `Active`: the worker is making progress.
/// - `Idle`: the worker is alive but has not shown activity since the last
///   probe.
/// - `Complete` / `Failed`: the worker reached a final state on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Active,
    Idle,
    Complete,
    Failed,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeState::Active => "active",
            ProbeState::Idle => "idle",
            ProbeState::Complete => "complete",
            ProbeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ProbeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "running" => Ok(ProbeState::Active),
            "idle" => Ok(ProbeState::Idle),
            "complete" | "completed" | "done" => Ok(ProbeState::Complete),
            "failed" | "error" => Ok(ProbeState::Failed),
            other => Err(format!(
                "invalid worker status: {other} (expected active, idle, complete or failed)"
            )),
        }
    }
}
