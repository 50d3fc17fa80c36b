#![allow(dead_code)]

use wavedag::config::{DagFile, EdgeConfig, NodeConfig, RawDagFile, WorkerTypeSection};
use wavedag::errors::Result;

/// Builder for `DagFile` to simplify test setup.
///
/// Durations are given in the DAG file syntax (`"30s"`, `"15m"`).
pub struct DagFileBuilder {
    raw: RawDagFile,
}

impl DagFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawDagFile::default(),
        }
    }

    pub fn node(mut self, id: &str, deps: &[&str]) -> Self {
        self.raw.node.insert(
            id.to_string(),
            NodeConfig {
                task: format!("task for {id}"),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                worker_type: None,
            },
        );
        self
    }

    pub fn node_with_type(mut self, id: &str, deps: &[&str], worker_type: &str) -> Self {
        self = self.node(id, deps);
        if let Some(node) = self.raw.node.get_mut(id) {
            node.worker_type = Some(worker_type.to_string());
        }
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.raw.edge.push(EdgeConfig {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn worker_cmd(mut self, cmd: &str) -> Self {
        self.raw.worker.cmd = cmd.to_string();
        self
    }

    pub fn worker_type(mut self, name: &str, cmd: &str) -> Self {
        self.raw.worker_types.insert(
            name.to_string(),
            WorkerTypeSection {
                cmd: cmd.to_string(),
            },
        );
        self
    }

    pub fn budget(mut self, ceiling: f64) -> Self {
        self.raw.config.budget_ceiling = Some(ceiling);
        self
    }

    pub fn thresholds(mut self, warn: f64, hard_stop: f64) -> Self {
        self.raw.config.warn_threshold = warn;
        self.raw.config.hard_stop_threshold = hard_stop;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.raw.config.max_concurrency = n;
        self
    }

    pub fn poll_interval(mut self, d: &str) -> Self {
        self.raw.config.poll_interval = d.to_string();
        self
    }

    pub fn idle_timeout(mut self, d: &str) -> Self {
        self.raw.config.idle_timeout = d.to_string();
        self
    }

    pub fn probe_timeout(mut self, d: &str) -> Self {
        self.raw.config.probe_timeout = d.to_string();
        self
    }

    pub fn raw(&self) -> &RawDagFile {
        &self.raw
    }

    pub fn try_build(self) -> Result<DagFile> {
        DagFile::try_from(self.raw)
    }

    pub fn build(self) -> DagFile {
        self.try_build()
            .expect("Failed to build valid DAG from builder")
    }
}

impl Default for DagFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `{A: [], B: [A], C: [], D: [B, C]}`
pub fn diamond() -> DagFileBuilder {
    DagFileBuilder::new()
        .node("A", &[])
        .node("B", &["A"])
        .node("C", &[])
        .node("D", &["B", "C"])
}
