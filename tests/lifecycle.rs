// tests/lifecycle.rs

use std::time::Duration;

use wavedag::config::DagFile;
use wavedag::errors::WavedagError;
use wavedag::state::{AgentStatus, KillReason, NewSession, SessionStatus, WaveStatus};
use wavedag::worker::LifecycleManager;
use wavedag_test_utils::Harness;
use wavedag_test_utils::builders::DagFileBuilder;
use wavedag_test_utils::scripted::{ProbeStep, active, complete_with_cost, failed, idle};

/// Session `s1` with wave 0 active and a lifecycle manager over the harness.
fn setup(h: &Harness, dag: &DagFile) -> LifecycleManager {
    h.store
        .create_session(NewSession {
            session_id: "s1".into(),
            dag_path: None,
            dag_fingerprint: dag.fingerprint(),
            budget_ceiling: dag.settings.budget_ceiling,
            warn_threshold: dag.settings.warn_threshold,
            hard_stop_threshold: dag.settings.hard_stop_threshold,
            max_concurrency: dag.settings.max_concurrency,
        })
        .unwrap();
    for wave in dag.waves() {
        h.store
            .add_wave("s1", wave.wave_number, wave.nodes.clone())
            .unwrap();
    }
    h.store.set_session_status("s1", SessionStatus::Active).unwrap();
    h.store.update_wave_status("s1", 0, WaveStatus::Active).unwrap();
    h.lifecycle(dag)
}

fn two_nodes() -> DagFile {
    DagFileBuilder::new()
        .node("A", &[])
        .node_with_type("B", &[], "reviewer")
        .worker_type("reviewer", "review-agent")
        .idle_timeout("15m")
        .probe_timeout("20ms")
        .build()
}

#[tokio::test]
async fn spawn_records_an_active_agent_with_its_handle() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    let node = dag.node("B").unwrap();

    let agent = lifecycle
        .spawn("s1", node, dag.command_for(node))
        .await
        .unwrap();

    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.worker_type.as_deref(), Some("reviewer"));
    assert_eq!(agent.handle.as_ref().unwrap().worker_id, agent.agent_id);

    let request = &h.workers.launch_requests()[0];
    assert_eq!(request.cmd, "review-agent");
    assert_eq!(request.task, "task for B");
    assert_eq!(request.context.session_id, "s1");
    assert_eq!(
        request.context.workdir,
        lifecycle.workdir_for("s1", &agent.agent_id)
    );
    assert!(request.context.workdir.starts_with("/state/workers/s1"));
}

#[tokio::test]
async fn spawn_failure_keeps_the_agent_pending() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.fail_launch("A");

    let err = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap_err();

    assert!(matches!(err, WavedagError::Spawn(ref e) if e.node == "A"));
    let agents = h.store.list_agents("s1").unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Pending);
    assert!(agents[0].error.is_some());
    assert!(agents[0].handle.is_none());
}

#[tokio::test]
async fn poll_records_cost_and_completion() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.script("A", [complete_with_cost(2.5)]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    let status = lifecycle.poll("s1", &agent.agent_id).await.unwrap();

    assert_eq!(status, AgentStatus::Complete);
    let session = h.store.get_session("s1").unwrap();
    assert_eq!(session.agents[&agent.agent_id].cost, 2.5);
    assert_eq!(session.budget.accumulated, 2.5);

    // Terminal agents are left alone.
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Complete
    );
}

#[tokio::test]
async fn failed_report_marks_the_agent_failed() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.script("A", [failed()]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Failed
    );
}

#[tokio::test]
async fn idle_exactly_at_the_timeout_is_not_killed() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.script("A", [idle()]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    h.clock.advance(Duration::from_secs(15 * 60));
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Active
    );
    assert!(h.workers.killed().is_empty());

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Killed
    );
    let record = h.store.get_agent("s1", &agent.agent_id).unwrap();
    assert_eq!(record.kill_reason, Some(KillReason::IdleTimeout));
    assert_eq!(h.workers.killed(), vec![agent.agent_id.clone()]);
}

#[tokio::test]
async fn active_report_refreshes_last_updated() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.script("A", [active(), idle()]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    h.clock.advance(Duration::from_secs(10 * 60));
    lifecycle.poll("s1", &agent.agent_id).await.unwrap();
    let refreshed = h.store.get_agent("s1", &agent.agent_id).unwrap();
    assert!(refreshed.last_updated > agent.last_updated);

    h.clock.advance(Duration::from_secs(10 * 60));
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Active
    );
}

#[tokio::test]
async fn hanging_probe_counts_as_idle() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers.script("A", [ProbeStep::Hang]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    let status = wavedag_test_utils::with_timeout(lifecycle.poll("s1", &agent.agent_id)).await;
    assert_eq!(status.unwrap(), AgentStatus::Active);

    h.clock.advance(Duration::from_secs(16 * 60));
    let status = wavedag_test_utils::with_timeout(lifecycle.poll("s1", &agent.agent_id)).await;
    assert_eq!(status.unwrap(), AgentStatus::Killed);
}

#[tokio::test]
async fn probe_errors_count_as_idle() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers
        .script("A", [ProbeStep::Error("terminal went away".into())]);
    let agent = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Active
    );

    h.clock.advance(Duration::from_secs(15 * 60));
    assert_eq!(
        lifecycle.poll("s1", &agent.agent_id).await.unwrap(),
        AgentStatus::Killed
    );
}

#[tokio::test]
async fn abort_session_kills_only_active_agents() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);
    h.workers
        .script("A", [active()])
        .script("B", [complete_with_cost(1.0)]);
    let a = lifecycle
        .spawn("s1", dag.node("A").unwrap(), "agent")
        .await
        .unwrap();
    let b = lifecycle
        .spawn("s1", dag.node("B").unwrap(), "agent")
        .await
        .unwrap();
    lifecycle.poll("s1", &b.agent_id).await.unwrap();

    let killed = lifecycle.abort_session("s1").await.unwrap();

    assert_eq!(killed, vec![a.agent_id.clone()]);
    let session = h.store.get_session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.agents[&a.agent_id].status, AgentStatus::Killed);
    assert_eq!(
        session.agents[&a.agent_id].kill_reason,
        Some(KillReason::SessionAbort)
    );
    assert_eq!(session.agents[&b.agent_id].status, AgentStatus::Complete);
}

#[tokio::test]
async fn unknown_agent_is_reported() {
    let h = Harness::new();
    let dag = two_nodes();
    let lifecycle = setup(&h, &dag);

    assert!(matches!(
        lifecycle.poll("s1", "nope").await,
        Err(WavedagError::AgentNotFound { .. })
    ));
}
