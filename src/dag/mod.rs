// src/dag/mod.rs

//! DAG representation and wave planning.
//!
//! - [`graph`] holds the validated node set with dependency/dependent
//!   adjacency.
//! - [`planner`] partitions the graph into waves that can run in parallel.

pub mod graph;
pub mod planner;

pub use graph::{DagGraph, Node};
pub use planner::{Wave, plan_waves, wave_index};
