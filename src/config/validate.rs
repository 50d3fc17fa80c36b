// src/config/validate.rs

use regex::Regex;
use tracing::warn;

use crate::config::duration::parse_duration;
use crate::config::model::{DagFile, OrchestratorSettings, RawDagFile};
use crate::dag::{DagGraph, Node, plan_waves};
use crate::errors::{Result, ValidationError, WavedagError};

impl TryFrom<RawDagFile> for DagFile {
    type Error = WavedagError;

    fn try_from(raw: RawDagFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_nodes(&raw)?;
        let settings = validate_settings(&raw)?;
        validate_worker_patterns(&raw)?;
        validate_worker_types(&raw)?;
        let nodes = merge_edges(&raw)?;

        let graph = DagGraph::new(nodes)?;
        let waves = plan_waves(&graph)?;

        Ok(DagFile::new_unchecked(
            settings,
            raw.worker,
            raw.worker_types,
            graph,
            waves,
        ))
    }
}

fn ensure_has_nodes(raw: &RawDagFile) -> Result<()> {
    if raw.node.is_empty() {
        return Err(ValidationError::Empty.into());
    }
    Ok(())
}

fn validate_settings(raw: &RawDagFile) -> Result<OrchestratorSettings> {
    let cfg = &raw.config;

    if cfg.max_concurrency == 0 {
        return Err(WavedagError::ConfigError(
            "[config].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(ceiling) = cfg.budget_ceiling {
        if !ceiling.is_finite() || ceiling < 0.0 {
            return Err(WavedagError::ConfigError(format!(
                "[config].budget_ceiling must be a non-negative number (got {ceiling})"
            )));
        }
    }

    for (name, value) in [
        ("warn_threshold", cfg.warn_threshold),
        ("hard_stop_threshold", cfg.hard_stop_threshold),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(WavedagError::ConfigError(format!(
                "[config].{name} must be in (0, 1] (got {value})"
            )));
        }
    }

    if cfg.warn_threshold > cfg.hard_stop_threshold {
        return Err(WavedagError::ConfigError(format!(
            "[config].warn_threshold ({}) must not exceed hard_stop_threshold ({})",
            cfg.warn_threshold, cfg.hard_stop_threshold
        )));
    }

    let duration = |key: &str, value: &str| {
        parse_duration(value)
            .map_err(|e| WavedagError::ConfigError(format!("[config].{key}: {e}")))
    };

    let settings = OrchestratorSettings {
        budget_ceiling: cfg.budget_ceiling,
        warn_threshold: cfg.warn_threshold,
        hard_stop_threshold: cfg.hard_stop_threshold,
        max_concurrency: cfg.max_concurrency,
        poll_interval: duration("poll_interval", &cfg.poll_interval)?,
        idle_timeout: duration("idle_timeout", &cfg.idle_timeout)?,
        probe_timeout: duration("probe_timeout", &cfg.probe_timeout)?,
    };

    if settings.poll_interval.is_zero() {
        return Err(WavedagError::ConfigError(
            "[config].poll_interval must be greater than zero".to_string(),
        ));
    }

    Ok(settings)
}

fn validate_worker_patterns(raw: &RawDagFile) -> Result<()> {
    let worker = &raw.worker;

    if worker.cmd.trim().is_empty() {
        return Err(WavedagError::ConfigError(
            "[worker].cmd must not be empty".to_string(),
        ));
    }

    for (key, pattern) in [
        ("status_pattern", &worker.status_pattern),
        ("complete_pattern", &worker.complete_pattern),
        ("failed_pattern", &worker.failed_pattern),
        ("cost_pattern", &worker.cost_pattern),
    ] {
        if let Some(p) = pattern {
            Regex::new(p).map_err(|e| {
                WavedagError::ConfigError(format!("[worker].{key} is not a valid regex: {e}"))
            })?;
        }
    }
    Ok(())
}

fn validate_worker_types(raw: &RawDagFile) -> Result<()> {
    for (id, node) in raw.node.iter() {
        if let Some(worker_type) = &node.worker_type {
            if !raw.worker_types.contains_key(worker_type) {
                warn!(
                    node = %id,
                    worker_type = %worker_type,
                    "no [worker_types] entry for worker type; using default [worker].cmd"
                );
            }
        }
    }
    Ok(())
}

/// Fold the explicit edge list into node dependencies.
///
/// Edges must reference existing nodes. An edge that is not mirrored in the
/// target's `dependencies` is still honoured, but we warn since the two lists
/// are supposed to agree.
fn merge_edges(raw: &RawDagFile) -> Result<Vec<Node>> {
    let mut nodes: Vec<Node> = raw
        .node
        .iter()
        .map(|(id, cfg)| Node {
            id: id.clone(),
            task: cfg.task.clone(),
            dependencies: cfg.dependencies.clone(),
            worker_type: cfg.worker_type.clone(),
        })
        .collect();

    for edge in raw.edge.iter() {
        if !raw.node.contains_key(&edge.from) {
            return Err(ValidationError::UnknownDependency {
                node: edge.to.clone(),
                dependency: edge.from.clone(),
            }
            .into());
        }

        let Some(target) = nodes.iter_mut().find(|n| n.id == edge.to) else {
            return Err(ValidationError::UnknownDependency {
                node: edge.from.clone(),
                dependency: edge.to.clone(),
            }
            .into());
        };

        if !target.dependencies.contains(&edge.from) {
            warn!(
                from = %edge.from,
                to = %edge.to,
                "edge is not listed in the target's dependencies; adding it"
            );
            target.dependencies.push(edge.from.clone());
        }
    }

    Ok(nodes)
}
