// src/worker/mod.rs

//! Worker lifecycle: starting workers, probing them, and killing them.
//!
//! - [`lifecycle`] owns the agent state machine and talks to the state store.
//! - [`backend`] defines the launcher and probe seams.
//! - [`process`] launches workers as shell processes.
//! - [`probe`] classifies workers from their output log.

pub mod backend;
pub mod handle;
pub mod lifecycle;
pub mod probe;
pub mod process;

pub use backend::{
    BoxFuture, ExecutionContext, LaunchRequest, ProbeReport, StatusProbe, WorkerLauncher,
};
pub use handle::WorkerHandle;
pub use lifecycle::{LifecycleManager, LifecyclePolicy};
pub use probe::{OutputProbe, ProbePatterns};
pub use process::ProcessLauncher;
