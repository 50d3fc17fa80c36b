// tests/store_on_disk.rs

use tempfile::TempDir;
use wavedag::errors::WavedagError;
use wavedag::state::{AgentStatus, NewSession, SessionStatus, StateStore, WaveStatus};

fn spec(id: &str) -> NewSession {
    NewSession {
        session_id: id.to_string(),
        dag_path: Some("Wavedag.toml".into()),
        dag_fingerprint: "fp".to_string(),
        budget_ceiling: Some(10.0),
        warn_threshold: 0.7,
        hard_stop_threshold: 1.0,
        max_concurrency: 2,
    }
}

#[test]
fn state_survives_a_new_store_instance() {
    let dir = TempDir::new().unwrap();
    {
        let store = StateStore::on_disk(dir.path());
        store.create_session(spec("s1")).unwrap();
        store.add_wave("s1", 0, vec!["A".into()]).unwrap();
        store.set_session_status("s1", SessionStatus::Active).unwrap();
        store.update_wave_status("s1", 0, WaveStatus::Active).unwrap();
        let agent = store.add_agent("s1", "A", None).unwrap();
        store
            .set_agent_handle(
                "s1",
                &agent.agent_id,
                wavedag::worker::WorkerHandle::detached(agent.agent_id.clone(), "A"),
            )
            .unwrap();
        store.update_agent_cost("s1", &agent.agent_id, 3.5).unwrap();
    }

    assert!(dir.path().join("sessions/s1.json").is_file());

    let reopened = StateStore::on_disk(dir.path());
    let session = reopened.get_session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.budget.accumulated, 3.5);
    assert_eq!(session.waves[0].status, WaveStatus::Active);
    let agent = session.agents.values().next().unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert!(agent.handle.is_some());
}

#[test]
fn archiving_moves_the_record() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::on_disk(dir.path());
    store.create_session(spec("s1")).unwrap();
    store.set_session_status("s1", SessionStatus::Active).unwrap();
    store.set_session_status("s1", SessionStatus::Complete).unwrap();

    store.archive_session("s1").unwrap();

    assert!(!dir.path().join("sessions/s1.json").exists());
    assert!(dir.path().join("archive/s1.json").is_file());

    let reopened = StateStore::on_disk(dir.path());
    assert_eq!(
        reopened.get_session("s1").unwrap().status,
        SessionStatus::Archived
    );
    assert_eq!(reopened.list_sessions().unwrap(), vec!["s1".to_string()]);
    assert!(matches!(
        reopened.create_session(spec("s1")),
        Err(WavedagError::SessionExists(_))
    ));
}

#[test]
fn corrupted_record_is_reported_not_replaced() {
    let dir = TempDir::new().unwrap();
    let sessions = dir.path().join("sessions");
    std::fs::create_dir_all(&sessions).unwrap();
    std::fs::write(sessions.join("s1.json"), "{ not json").unwrap();

    let store = StateStore::on_disk(dir.path());
    assert!(matches!(
        store.get_session("s1"),
        Err(WavedagError::StateCorruption { .. })
    ));
    assert_eq!(
        std::fs::read_to_string(sessions.join("s1.json")).unwrap(),
        "{ not json"
    );
}

#[test]
fn no_temp_files_are_left_behind() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::on_disk(dir.path());
    store.create_session(spec("s1")).unwrap();
    store.create_session(spec("s2")).unwrap();
    store.set_budget_ceiling("s2", Some(50.0)).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("sessions"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["s1.json", "s2.json"]);
    assert_eq!(
        store.list_sessions().unwrap(),
        vec!["s1".to_string(), "s2".to_string()]
    );
}

#[test]
fn listing_an_empty_state_dir_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::on_disk(dir.path().join("never-created"));
    assert!(store.list_sessions().unwrap().is_empty());
    assert!(matches!(
        store.get_session("s1"),
        Err(WavedagError::SessionNotFound(_))
    ));
}
