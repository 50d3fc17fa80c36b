// src/state/store.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::{Result, WavedagError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::state::model::{
    AgentRecord, AgentStatus, BudgetRecord, KillReason, NewSession, Session, SessionStatus,
    WaveRecord, WaveStatus,
};
use crate::types::{AgentId, NodeId, SessionId};
use crate::worker::WorkerHandle;

const SESSIONS_DIR: &str = "sessions";
const ARCHIVE_DIR: &str = "archive";

type SessionSlot = Arc<Mutex<Session>>;

/// Single source of truth for session, wave and agent state.
///
/// Each session lives behind its own lock. A mutation runs against a private
/// copy of the record, is persisted (atomic replace), and only then becomes
/// visible to readers. A failed mutation or a failed write leaves both the
/// in-memory and the on-disk record untouched.
///
/// On-disk layout below `root`:
///
/// ```text
/// sessions/<session_id>.json
/// archive/<session_id>.json
/// ```
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            fs,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Store backed by the real filesystem and the system clock.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(RealFileSystem), Arc::new(SystemClock))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // ---- sessions -------------------------------------------------------

    pub fn create_session(&self, spec: NewSession) -> Result<Session> {
        let id = spec.session_id.clone();
        check_session_id(&id)?;
        let mut slots = self.slots.lock();

        if slots.contains_key(&id)
            || self.fs.exists(&self.session_path(&id))
            || self.fs.exists(&self.archive_path(&id))
        {
            return Err(WavedagError::SessionExists(id));
        }

        let now = self.clock.now();
        let session = Session {
            session_id: id.clone(),
            status: SessionStatus::Planning,
            created_at: now,
            updated_at: now,
            dag_path: spec.dag_path,
            dag_fingerprint: spec.dag_fingerprint,
            budget: BudgetRecord {
                ceiling: spec.budget_ceiling,
                accumulated: 0.0,
                warn_threshold: spec.warn_threshold,
                hard_stop_threshold: spec.hard_stop_threshold,
            },
            max_concurrency: spec.max_concurrency,
            waves: Vec::new(),
            agents: Default::default(),
        };

        self.persist(&session)?;
        slots.insert(id.clone(), Arc::new(Mutex::new(session.clone())));
        info!(session_id = %id, "session created");
        Ok(session)
    }

    /// Snapshot of the current session record.
    pub fn get_session(&self, id: &str) -> Result<Session> {
        let slot = self.slot(id)?;
        let session = slot.lock().clone();
        Ok(session)
    }

    /// Ids of all sessions (active and archived) found under the root.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        for dir in [SESSIONS_DIR, ARCHIVE_DIR] {
            for path in self.fs.list_files(&self.root.join(dir))? {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        self.mutate(id, |session| {
            if session.status == status {
                return Ok(());
            }
            if status == SessionStatus::Archived || session.status == SessionStatus::Archived {
                return Err(invalid("session", session.status, status));
            }
            if !session.status.can_transition_to(status) {
                return Err(invalid("session", session.status, status));
            }
            session.status = status;
            Ok(())
        })?;
        debug!(session_id = %id, %status, "session status updated");
        Ok(())
    }

    /// Operator top-up (or reduction) of the budget ceiling.
    pub fn set_budget_ceiling(&self, id: &str, ceiling: Option<f64>) -> Result<()> {
        if let Some(c) = ceiling {
            if !c.is_finite() || c < 0.0 {
                return Err(WavedagError::ConfigError(format!(
                    "budget ceiling must be a non-negative number (got {c})"
                )));
            }
        }
        self.mutate(id, |session| {
            session.budget.ceiling = ceiling;
            Ok(())
        })?;
        info!(session_id = %id, ?ceiling, "budget ceiling updated");
        Ok(())
    }

    /// Move a finished session to the archive.
    pub fn archive_session(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            if !session.status.can_transition_to(SessionStatus::Archived) {
                return Err(invalid("session", session.status, SessionStatus::Archived));
            }
            session.status = SessionStatus::Archived;
            Ok(())
        })?;

        let active = self.session_path(id);
        if self.fs.exists(&active) {
            self.fs.remove_file(&active)?;
        }
        info!(session_id = %id, "session archived");
        Ok(())
    }

    /// Bring an archived session back so it can be run again.
    pub fn reopen_session(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            if session.status != SessionStatus::Archived {
                return Err(invalid("session", session.status, SessionStatus::Active));
            }
            session.status = SessionStatus::Active;
            Ok(())
        })?;

        let archived = self.archive_path(id);
        if self.fs.exists(&archived) {
            self.fs.remove_file(&archived)?;
        }
        info!(session_id = %id, "archived session reopened");
        Ok(())
    }

    // ---- waves ----------------------------------------------------------

    /// Append the next wave. Waves must be added in index order.
    pub fn add_wave(&self, id: &str, wave_number: usize, node_ids: Vec<NodeId>) -> Result<()> {
        self.mutate(id, |session| {
            if wave_number != session.waves.len() {
                return Err(WavedagError::ConfigError(format!(
                    "wave {wave_number} added out of order (session has {} waves)",
                    session.waves.len()
                )));
            }
            if let Some(node) = node_ids.iter().find(|n| session.wave_of(n).is_some()) {
                return Err(WavedagError::ConfigError(format!(
                    "node '{node}' already belongs to another wave"
                )));
            }
            session.waves.push(WaveRecord {
                wave_number,
                status: WaveStatus::Pending,
                node_ids,
            });
            Ok(())
        })
    }

    pub fn update_wave_status(&self, id: &str, wave_number: usize, status: WaveStatus) -> Result<()> {
        self.mutate(id, |session| {
            let wave = session
                .waves
                .get_mut(wave_number)
                .ok_or_else(|| WavedagError::WaveNotFound {
                    session: id.to_string(),
                    wave: wave_number,
                })?;
            if !wave.status.can_transition_to(status) {
                return Err(invalid(&format!("wave {wave_number}"), wave.status, status));
            }
            wave.status = status;
            Ok(())
        })?;
        debug!(session_id = %id, wave = wave_number, %status, "wave status updated");
        Ok(())
    }

    /// Reset every wave from `wave_number` onwards to `pending`.
    pub fn reset_waves_from(&self, id: &str, wave_number: usize) -> Result<()> {
        self.mutate(id, |session| {
            if wave_number > session.waves.len() {
                return Err(WavedagError::WaveNotFound {
                    session: id.to_string(),
                    wave: wave_number,
                });
            }
            for wave in session.waves.iter_mut().skip(wave_number) {
                wave.status = WaveStatus::Pending;
            }
            Ok(())
        })?;
        debug!(session_id = %id, from = wave_number, "waves reset to pending");
        Ok(())
    }

    /// Mark every agent still `active` as `killed` (orphaned).
    ///
    /// Only one control process drives a session, so at startup any agent
    /// left `active` belongs to a process that is gone. Returns the reaped
    /// agent ids.
    pub fn reap_orphans(&self, id: &str) -> Result<Vec<AgentId>> {
        let reaped = self.mutate(id, |session| {
            let now = self.clock.now();
            let mut reaped = Vec::new();
            for agent in session.agents.values_mut() {
                if agent.status == AgentStatus::Active {
                    agent.status = AgentStatus::Killed;
                    agent.kill_reason = Some(KillReason::Orphaned);
                    agent.last_updated = now;
                    reaped.push(agent.agent_id.clone());
                }
            }
            Ok(reaped)
        })?;

        if !reaped.is_empty() {
            warn!(session_id = %id, agents = ?reaped, "marked orphaned agents as killed");
        }
        Ok(reaped)
    }

    pub fn get_last_completed_wave(&self, id: &str) -> Result<Option<usize>> {
        Ok(self.get_session(id)?.last_completed_wave())
    }

    // ---- agents ---------------------------------------------------------

    /// Record a new `pending` agent for `node_id`.
    ///
    /// The node's wave must be `active`; agents are never created for nodes
    /// in pending or finished waves.
    pub fn add_agent(
        &self,
        id: &str,
        node_id: &str,
        worker_type: Option<String>,
    ) -> Result<AgentRecord> {
        let agent_id = Uuid::new_v4().to_string();
        let record = self.mutate(id, |session| {
            let (wave_number, wave_status) = session
                .wave_of(node_id)
                .map(|w| (w.wave_number, w.status))
                .ok_or_else(|| {
                    WavedagError::ConfigError(format!(
                        "node '{node_id}' is not part of session '{id}'"
                    ))
                })?;
            if wave_status != WaveStatus::Active {
                return Err(WavedagError::InvalidTransition {
                    entity: format!("node '{node_id}' in wave {wave_number}"),
                    from: wave_status.to_string(),
                    to: "spawn".to_string(),
                });
            }

            let now = self.clock.now();
            let record = AgentRecord {
                agent_id: agent_id.clone(),
                node_id: node_id.to_string(),
                wave_number,
                worker_type,
                status: AgentStatus::Pending,
                cost: 0.0,
                created_at: now,
                last_updated: now,
                handle: None,
                kill_reason: None,
                error: None,
            };
            session.agents.insert(agent_id.clone(), record.clone());
            Ok(record)
        })?;
        debug!(session_id = %id, node = %node_id, agent_id = %record.agent_id, "agent recorded");
        Ok(record)
    }

    pub fn get_agent(&self, id: &str, agent_id: &str) -> Result<AgentRecord> {
        let session = self.get_session(id)?;
        session
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| agent_not_found(id, agent_id))
    }

    pub fn list_agents(&self, id: &str) -> Result<Vec<AgentRecord>> {
        let session = self.get_session(id)?;
        Ok(session.agents.into_values().collect())
    }

    /// Attach the live worker handle and move the agent to `active` in one
    /// step.
    pub fn set_agent_handle(&self, id: &str, agent_id: &str, handle: WorkerHandle) -> Result<AgentRecord> {
        self.mutate(id, |session| {
            let now = self.clock.now();
            let agent = agent_mut(session, id, agent_id)?;
            if !agent.status.can_transition_to(AgentStatus::Active) {
                return Err(invalid(&format!("agent {agent_id}"), agent.status, AgentStatus::Active));
            }
            agent.handle = Some(handle);
            agent.status = AgentStatus::Active;
            agent.last_updated = now;
            Ok(agent.clone())
        })
    }

    /// Remember why a spawn failed. The agent stays `pending`.
    pub fn record_spawn_failure(&self, id: &str, agent_id: &str, reason: &str) -> Result<()> {
        self.mutate(id, |session| {
            let now = self.clock.now();
            let agent = agent_mut(session, id, agent_id)?;
            agent.error = Some(reason.to_string());
            agent.last_updated = now;
            Ok(())
        })
    }

    pub fn update_agent_status(
        &self,
        id: &str,
        agent_id: &str,
        status: AgentStatus,
        kill_reason: Option<KillReason>,
    ) -> Result<AgentRecord> {
        let record = self.mutate(id, |session| {
            let now = self.clock.now();
            let agent = agent_mut(session, id, agent_id)?;
            if !agent.status.can_transition_to(status) {
                return Err(invalid(&format!("agent {agent_id}"), agent.status, status));
            }
            agent.status = status;
            agent.last_updated = now;
            if status == AgentStatus::Killed {
                agent.kill_reason = kill_reason;
            }
            Ok(agent.clone())
        })?;
        debug!(session_id = %id, agent_id = %agent_id, %status, "agent status updated");
        Ok(record)
    }

    /// Record an agent's latest absolute cost and return the session total.
    ///
    /// Costs never go down: a report lower than what is already recorded is
    /// ignored, which keeps the session total monotonic.
    pub fn update_agent_cost(&self, id: &str, agent_id: &str, cost: f64) -> Result<f64> {
        self.mutate(id, |session| {
            let agent = agent_mut(session, id, agent_id)?;
            if !cost.is_finite() || cost < 0.0 {
                warn!(agent_id = %agent_id, cost, "ignoring invalid cost report");
            } else if cost < agent.cost {
                warn!(
                    agent_id = %agent_id,
                    reported = cost,
                    recorded = agent.cost,
                    "ignoring cost report lower than the recorded value"
                );
            } else {
                agent.cost = cost;
            }
            let total = session.agent_cost_total();
            session.budget.accumulated = session.budget.accumulated.max(total);
            Ok(session.budget.accumulated)
        })
    }

    // ---- internals ------------------------------------------------------

    fn session_path(&self, id: &str) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(format!("{id}.json"))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(format!("{id}.json"))
    }

    fn slot(&self, id: &str) -> Result<SessionSlot> {
        check_session_id(id)?;
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(id) {
            return Ok(Arc::clone(slot));
        }

        let session = self.load(id)?;
        let slot = Arc::new(Mutex::new(session));
        slots.insert(id.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    fn load(&self, id: &str) -> Result<Session> {
        let path = [self.session_path(id), self.archive_path(id)]
            .into_iter()
            .find(|p| self.fs.exists(p))
            .ok_or_else(|| WavedagError::SessionNotFound(id.to_string()))?;

        let contents = self.fs.read_to_string(&path)?;
        let session: Session =
            serde_json::from_str(&contents).map_err(|e| WavedagError::StateCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if session.session_id != id {
            return Err(WavedagError::StateCorruption {
                path,
                reason: format!("file holds session '{}'", session.session_id),
            });
        }

        debug!(session_id = %id, path = ?path, "session loaded from disk");
        Ok(session)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let path = if session.status == SessionStatus::Archived {
            self.archive_path(&session.session_id)
        } else {
            self.session_path(&session.session_id)
        };
        let json = serde_json::to_vec_pretty(session)?;
        self.fs.write_atomic(&path, &json)?;
        Ok(())
    }

    /// Run `f` against a copy of the session, persist the result, then
    /// publish it. The per-session lock is held throughout.
    fn mutate<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();

        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        draft.updated_at = self.clock.now();

        self.persist(&draft)?;
        *guard = draft;
        Ok(out)
    }
}

fn agent_mut<'a>(session: &'a mut Session, id: &str, agent_id: &str) -> Result<&'a mut AgentRecord> {
    session
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| agent_not_found(id, agent_id))
}

fn agent_not_found(id: &str, agent_id: &str) -> WavedagError {
    WavedagError::AgentNotFound {
        session: id.to_string(),
        agent: agent_id.to_string(),
    }
}

fn invalid(entity: &str, from: impl ToString, to: impl ToString) -> WavedagError {
    WavedagError::InvalidTransition {
        entity: entity.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Session ids become file and directory names below the state root.
fn check_session_id(id: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if id.is_empty() || id.contains("..") || !id.chars().all(allowed) {
        return Err(WavedagError::ConfigError(format!(
            "invalid session id '{id}': use letters, digits, '.', '_' and '-' only"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fs::mock::MockFileSystem;
    use std::time::Duration;

    fn spec(id: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            dag_path: None,
            dag_fingerprint: "fp".to_string(),
            budget_ceiling: Some(10.0),
            warn_threshold: 0.7,
            hard_stop_threshold: 1.0,
            max_concurrency: 2,
        }
    }

    fn store() -> (StateStore, MockFileSystem, ManualClock) {
        let fs = MockFileSystem::new();
        let clock = ManualClock::default();
        let store = StateStore::new("/state", Arc::new(fs.clone()), Arc::new(clock.clone()));
        (store, fs, clock)
    }

    fn active_session(store: &StateStore) -> Session {
        store.create_session(spec("s1")).unwrap();
        store.add_wave("s1", 0, vec!["A".into(), "C".into()]).unwrap();
        store.add_wave("s1", 1, vec!["B".into()]).unwrap();
        store.set_session_status("s1", SessionStatus::Active).unwrap();
        store.update_wave_status("s1", 0, WaveStatus::Active).unwrap();
        store.get_session("s1").unwrap()
    }

    fn handle(node: &str) -> WorkerHandle {
        WorkerHandle::detached(format!("w-{node}"), node)
    }

    #[test]
    fn missing_session_is_reported_not_panicked() {
        let (store, _, _) = store();
        assert!(matches!(
            store.get_session("nope"),
            Err(WavedagError::SessionNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn session_ids_cannot_escape_the_state_dir() {
        let (store, fs, _) = store();
        for bad in ["", "../../etc/evil", "a/b", "a\\b", "..", "s1..x", "with space"] {
            assert!(
                matches!(store.create_session(spec(bad)), Err(WavedagError::ConfigError(_))),
                "{bad:?} was accepted"
            );
            assert!(matches!(
                store.get_session(bad),
                Err(WavedagError::ConfigError(_))
            ));
        }
        assert!(fs.paths().is_empty());

        store.create_session(spec("run-2024.10_a")).unwrap();
        assert!(fs.exists(Path::new("/state/sessions/run-2024.10_a.json")));
    }

    #[test]
    fn duplicate_session_is_rejected() {
        let (store, _, _) = store();
        store.create_session(spec("s1")).unwrap();
        assert!(matches!(
            store.create_session(spec("s1")),
            Err(WavedagError::SessionExists(_))
        ));
    }

    #[test]
    fn session_survives_a_fresh_store_instance() {
        let (store, fs, clock) = store();
        active_session(&store);

        let reopened = StateStore::new("/state", Arc::new(fs), Arc::new(clock));
        let session = reopened.get_session("s1").unwrap();
        assert_eq!(session.waves.len(), 2);
        assert_eq!(session.waves[0].status, WaveStatus::Active);
    }

    #[test]
    fn malformed_state_is_a_corruption_error() {
        let (store, fs, _) = store();
        fs.add_file("/state/sessions/bad.json", "{ not json");
        assert!(matches!(
            store.get_session("bad"),
            Err(WavedagError::StateCorruption { .. })
        ));
    }

    #[test]
    fn agents_cannot_be_added_to_future_waves() {
        let (store, _, _) = store();
        active_session(&store);

        store.add_agent("s1", "A", None).unwrap();
        assert!(matches!(
            store.add_agent("s1", "B", None),
            Err(WavedagError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let (store, fs, _) = store();
        active_session(&store);
        let agent = store.add_agent("s1", "A", None).unwrap();

        fs.set_fail_writes(true);
        assert!(store.set_agent_handle("s1", &agent.agent_id, handle("A")).is_err());
        fs.set_fail_writes(false);

        let after = store.get_agent("s1", &agent.agent_id).unwrap();
        assert_eq!(after.status, AgentStatus::Pending);
        assert!(after.handle.is_none());
    }

    #[test]
    fn cost_updates_are_absolute_and_monotonic() {
        let (store, _, _) = store();
        active_session(&store);
        let a = store.add_agent("s1", "A", None).unwrap();
        let c = store.add_agent("s1", "C", None).unwrap();

        assert_eq!(store.update_agent_cost("s1", &a.agent_id, 2.0).unwrap(), 2.0);
        // Repeated poll with the same absolute value must not double count.
        assert_eq!(store.update_agent_cost("s1", &a.agent_id, 2.0).unwrap(), 2.0);
        assert_eq!(store.update_agent_cost("s1", &c.agent_id, 3.5).unwrap(), 5.5);
        // A lower report is ignored.
        assert_eq!(store.update_agent_cost("s1", &a.agent_id, 1.0).unwrap(), 5.5);
        assert_eq!(store.get_session("s1").unwrap().budget.accumulated, 5.5);
    }

    #[test]
    fn terminal_agent_rejects_further_updates() {
        let (store, _, _) = store();
        active_session(&store);
        let a = store.add_agent("s1", "A", None).unwrap();
        store.set_agent_handle("s1", &a.agent_id, handle("A")).unwrap();
        store
            .update_agent_status("s1", &a.agent_id, AgentStatus::Complete, None)
            .unwrap();

        assert!(matches!(
            store.update_agent_status("s1", &a.agent_id, AgentStatus::Active, None),
            Err(WavedagError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn heartbeat_refreshes_last_updated() {
        let (store, _, clock) = store();
        active_session(&store);
        let a = store.add_agent("s1", "A", None).unwrap();
        let started = store.set_agent_handle("s1", &a.agent_id, handle("A")).unwrap();

        clock.advance(Duration::from_secs(60));
        let beat = store
            .update_agent_status("s1", &a.agent_id, AgentStatus::Active, None)
            .unwrap();
        assert_eq!(
            crate::clock::elapsed_between(started.last_updated, beat.last_updated),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn last_completed_wave_tracks_highest_complete_index() {
        let (store, _, _) = store();
        active_session(&store);
        assert_eq!(store.get_last_completed_wave("s1").unwrap(), None);

        store.update_wave_status("s1", 0, WaveStatus::Complete).unwrap();
        assert_eq!(store.get_last_completed_wave("s1").unwrap(), Some(0));
    }

    #[test]
    fn reset_and_reap_clear_a_crashed_run() {
        let (store, _, _) = store();
        active_session(&store);
        let a = store.add_agent("s1", "A", None).unwrap();
        store.set_agent_handle("s1", &a.agent_id, handle("A")).unwrap();

        let reaped = store.reap_orphans("s1").unwrap();
        assert_eq!(reaped, vec![a.agent_id.clone()]);
        store.reset_waves_from("s1", 0).unwrap();

        let session = store.get_session("s1").unwrap();
        assert!(session.waves.iter().all(|w| w.status == WaveStatus::Pending));
        let agent = &session.agents[&a.agent_id];
        assert_eq!(agent.status, AgentStatus::Killed);
        assert_eq!(agent.kill_reason, Some(KillReason::Orphaned));
    }

    #[test]
    fn archive_moves_the_record_and_reopen_brings_it_back() {
        let (store, fs, _) = store();
        active_session(&store);
        store.update_wave_status("s1", 0, WaveStatus::Complete).unwrap();
        store.set_session_status("s1", SessionStatus::Complete).unwrap();

        store.archive_session("s1").unwrap();
        assert!(!fs.exists(Path::new("/state/sessions/s1.json")));
        assert!(fs.exists(Path::new("/state/archive/s1.json")));
        assert_eq!(store.get_session("s1").unwrap().status, SessionStatus::Archived);
        assert_eq!(store.list_sessions().unwrap(), vec!["s1".to_string()]);

        store.reopen_session("s1").unwrap();
        assert!(fs.exists(Path::new("/state/sessions/s1.json")));
        assert!(!fs.exists(Path::new("/state/archive/s1.json")));
        assert_eq!(store.get_session("s1").unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn active_session_cannot_be_archived() {
        let (store, _, _) = store();
        active_session(&store);
        assert!(matches!(
            store.archive_session("s1"),
            Err(WavedagError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn concurrent_cost_updates_are_not_lost() {
        let (store, _, _) = store();
        active_session(&store);
        let store = Arc::new(store);
        let a = store.add_agent("s1", "A", None).unwrap();
        let c = store.add_agent("s1", "C", None).unwrap();

        let threads: Vec<_> = [(a.agent_id.clone(), 1.0), (c.agent_id.clone(), 100.0)]
            .into_iter()
            .map(|(agent, base)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.update_agent_cost("s1", &agent, base + i as f64).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let session = store.get_session("s1").unwrap();
        assert_eq!(session.agents[&a.agent_id].cost, 50.0);
        assert_eq!(session.agents[&c.agent_id].cost, 149.0);
        assert_eq!(session.budget.accumulated, 199.0);
    }
}
