// src/engine/wave.rs

//! Pure bookkeeping for one wave.
//!
//! [`WaveExecution`] decides which node to start next and how the wave
//! resolves. It performs no IO; the runner feeds it spawn results and agent
//! outcomes and acts on its answers.

use std::collections::{BTreeMap, VecDeque};

use crate::state::AgentStatus;
use crate::types::{AgentId, NodeId};

/// How a wave ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveResolution {
    /// Every node's agent completed.
    Complete,
    /// An agent failed or was killed, or a worker could not be started.
    /// `not_started` lists queued nodes that were never issued.
    Failed {
        failed: Vec<NodeId>,
        spawn_failed: Vec<NodeId>,
        not_started: Vec<NodeId>,
    },
    /// The budget ran out before these nodes could start.
    BudgetBlocked { blocked: Vec<NodeId> },
    /// The session was aborted while the wave was running.
    Aborted,
}

#[derive(Debug)]
pub struct WaveExecution {
    wave_number: usize,
    max_concurrency: usize,
    queued: VecDeque<NodeId>,
    running: BTreeMap<AgentId, NodeId>,
    completed: Vec<NodeId>,
    failed: Vec<NodeId>,
    spawn_failed: Vec<NodeId>,
    budget_blocked: Vec<NodeId>,
    aborted: bool,
}

impl WaveExecution {
    /// `max_concurrency` below 1 is treated as 1.
    pub fn new(wave_number: usize, nodes: Vec<NodeId>, max_concurrency: usize) -> Self {
        Self {
            wave_number,
            max_concurrency: max_concurrency.max(1),
            queued: nodes.into(),
            running: BTreeMap::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            spawn_failed: Vec::new(),
            budget_blocked: Vec::new(),
            aborted: false,
        }
    }

    pub fn wave_number(&self) -> usize {
        self.wave_number
    }

    /// A failure means the wave cannot complete; queued nodes are no longer
    /// issued.
    pub fn is_doomed(&self) -> bool {
        self.aborted || !self.failed.is_empty() || !self.spawn_failed.is_empty()
    }

    /// True when a node is waiting, a slot is free and the wave is still
    /// viable. Only then is a budget check needed.
    pub fn wants_spawn(&self) -> bool {
        !self.is_doomed()
            && self.budget_blocked.is_empty()
            && !self.queued.is_empty()
            && self.running.len() < self.max_concurrency
    }

    /// Next node to start, if any. With `budget_allows == false` every queued
    /// node is moved to the budget-blocked list instead.
    pub fn next_spawn(&mut self, budget_allows: bool) -> Option<NodeId> {
        if !self.wants_spawn() {
            return None;
        }
        if !budget_allows {
            self.budget_blocked.extend(self.queued.drain(..));
            return None;
        }
        self.queued.pop_front()
    }

    pub fn record_spawned(&mut self, node: NodeId, agent: AgentId) {
        self.running.insert(agent, node);
    }

    pub fn record_spawn_failed(&mut self, node: NodeId) {
        self.spawn_failed.push(node);
    }

    /// Apply a terminal agent status. Non-terminal statuses are ignored.
    pub fn record_finished(&mut self, agent: &str, status: AgentStatus) {
        if !status.is_terminal() {
            return;
        }
        let Some(node) = self.running.remove(agent) else {
            return;
        };
        match status {
            AgentStatus::Complete => self.completed.push(node),
            _ => self.failed.push(node),
        }
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn running_agents(&self) -> Vec<AgentId> {
        self.running.keys().cloned().collect()
    }

    pub fn completed(&self) -> &[NodeId] {
        &self.completed
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Nothing is running and nothing more will be started.
    pub fn is_settled(&self) -> bool {
        if !self.running.is_empty() {
            return false;
        }
        self.aborted
            || self.queued.is_empty()
            || self.is_doomed()
            || !self.budget_blocked.is_empty()
    }

    /// Final verdict. Agent failures take precedence over budget exhaustion.
    pub fn resolution(&self) -> WaveResolution {
        if self.aborted {
            return WaveResolution::Aborted;
        }
        if !self.failed.is_empty() || !self.spawn_failed.is_empty() {
            let mut not_started: Vec<NodeId> = self.queued.iter().cloned().collect();
            not_started.extend(self.budget_blocked.iter().cloned());
            return WaveResolution::Failed {
                failed: self.failed.clone(),
                spawn_failed: self.spawn_failed.clone(),
                not_started,
            };
        }
        if !self.budget_blocked.is_empty() {
            return WaveResolution::BudgetBlocked {
                blocked: self.budget_blocked.clone(),
            };
        }
        WaveResolution::Complete
    }
}
