// src/config/mod.rs

//! DAG file loading and validation for wavedag.
//!
//! Responsibilities:
//! - Define the TOML/JSON-backed data model (`model.rs`).
//! - Load a DAG file from disk (`loader.rs`).
//! - Validate invariants and plan waves (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path, resolve_state_dir};
pub use model::{
    DagFile, EdgeConfig, NodeConfig, OrchestratorSection, OrchestratorSettings, RawDagFile,
    WorkerSection, WorkerTypeSection,
};
