pub mod builders;
pub mod scripted;

use std::sync::{Arc, Once};

use tracing_subscriber::{EnvFilter, fmt};
use wavedag::clock::{Clock, ManualClock};
use wavedag::config::DagFile;
use wavedag::engine::{RunMode, RunOutcome, RunRequest, Runner, SteppingTicker};
use wavedag::errors::Result;
use wavedag::fs::mock::MockFileSystem;
use wavedag::state::StateStore;
use wavedag::worker::{LifecycleManager, LifecyclePolicy};

pub use scripted::ScriptedWorkers;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `WAVEDAG_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(wavedag::logging::LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// In-memory store, manual clock and scripted workers, wired the way
/// `wavedag run` wires the real ones.
#[derive(Debug, Clone)]
pub struct Harness {
    pub store: Arc<StateStore>,
    pub fs: MockFileSystem,
    pub clock: ManualClock,
    pub workers: ScriptedWorkers,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let fs = MockFileSystem::new();
        let clock = ManualClock::default();
        let store = Arc::new(StateStore::new(
            "/state",
            Arc::new(fs.clone()),
            Arc::new(clock.clone()) as Arc<dyn Clock>,
        ));
        Self {
            store,
            fs,
            clock,
            workers: ScriptedWorkers::new(),
        }
    }

    pub fn lifecycle(&self, dag: &DagFile) -> LifecycleManager {
        LifecycleManager::new(
            Arc::clone(&self.store),
            Arc::new(self.workers.clone()),
            Arc::new(self.workers.clone()),
            LifecyclePolicy {
                idle_timeout: dag.settings.idle_timeout,
                probe_timeout: dag.settings.probe_timeout,
            },
        )
    }

    /// Runner whose ticker advances the manual clock by the DAG's poll
    /// interval.
    pub fn runner(&self, dag: &DagFile) -> Runner<SteppingTicker> {
        let ticker = SteppingTicker::new(self.clock.clone(), dag.settings.poll_interval);
        Runner::new(Arc::clone(&self.store), self.lifecycle(dag), ticker)
    }

    pub fn request(session_id: &str, dag: &DagFile, mode: RunMode) -> RunRequest {
        RunRequest {
            session_id: session_id.to_string(),
            dag: dag.clone(),
            dag_path: None,
            mode,
            budget: None,
            max_concurrency: None,
        }
    }

    pub async fn try_run(&self, session_id: &str, dag: &DagFile, mode: RunMode) -> Result<RunOutcome> {
        let mut runner = self.runner(dag);
        with_timeout(runner.run(Self::request(session_id, dag, mode))).await
    }

    pub async fn run(&self, session_id: &str, dag: &DagFile, mode: RunMode) -> RunOutcome {
        self.try_run(session_id, dag, mode)
            .await
            .expect("run returned an error")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
