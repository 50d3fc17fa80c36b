// src/worker/process.rs

//! Worker launcher backed by OS processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SpawnError};

use super::WorkerHandle;
use super::backend::{BoxFuture, LaunchRequest, WorkerLauncher};

/// Worker output (stdout and stderr interleaved), inside the workdir.
pub const LOG_FILE: &str = "output.log";

/// Written once the worker is gone: its exit code, or [`KILLED_MARKER`].
pub const EXIT_FILE: &str = "exit";

pub const KILLED_MARKER: &str = "killed";

/// How long to wait for the output pumps to drain after the process ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs each worker as `sh -c <cmd>` inside its own working directory.
///
/// The worker sees its context through the environment:
/// `WAVEDAG_SESSION_ID`, `WAVEDAG_NODE_ID`, `WAVEDAG_AGENT_ID`,
/// `WAVEDAG_TASK`, `WAVEDAG_WORKDIR` and (if set) `WAVEDAG_WORKER_TYPE`.
///
/// At most one process runs per worker id. Each running process has a
/// cancel channel; [`WorkerLauncher::kill`] fires it and the supervising
/// task kills the child.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    active: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workers whose process has not exited yet.
    pub fn running(&self) -> usize {
        self.active.lock().len()
    }

    async fn start(&self, request: LaunchRequest) -> anyhow::Result<WorkerHandle> {
        let workdir = request.context.workdir.clone();
        let worker_id = request.context.agent_id.clone();

        fs::create_dir_all(&workdir)
            .await
            .with_context(|| format!("creating worker dir {:?}", workdir))?;

        let log_path = workdir.join(LOG_FILE);
        let exit_path = workdir.join(EXIT_FILE);
        remove_if_present(&exit_path).await?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .with_context(|| format!("opening worker log {:?}", log_path))?;

        info!(
            node = %request.node_id,
            agent_id = %worker_id,
            cmd = %request.cmd,
            "starting worker process"
        );

        let mut cmd = shell_command(&request.cmd);
        cmd.current_dir(&workdir)
            .env("WAVEDAG_SESSION_ID", &request.context.session_id)
            .env("WAVEDAG_NODE_ID", &request.node_id)
            .env("WAVEDAG_AGENT_ID", &worker_id)
            .env("WAVEDAG_TASK", &request.task)
            .env("WAVEDAG_WORKDIR", &workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(worker_type) = &request.worker_type {
            cmd.env("WAVEDAG_WORKER_TYPE", worker_type);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning worker for node '{}'", request.node_id))?;
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, "stdout", worker_id.clone(), line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, "stderr", worker_id.clone(), line_tx.clone());
        }
        drop(line_tx);
        let writer = tokio::spawn(write_log(log, line_rx, worker_id.clone()));

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        self.active.lock().insert(worker_id.clone(), cancel_tx);

        tokio::spawn(supervise(
            child,
            cancel_rx,
            writer,
            exit_path.clone(),
            worker_id.clone(),
            Arc::clone(&self.active),
        ));

        Ok(WorkerHandle {
            worker_id,
            node_id: request.node_id,
            pid,
            workdir: Some(workdir),
            log_path: Some(log_path),
            exit_path: Some(exit_path),
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> BoxFuture<'_, std::result::Result<WorkerHandle, SpawnError>> {
        let node = request.node_id.clone();
        Box::pin(async move {
            self.start(request)
                .await
                .map_err(|e| SpawnError::new(node, format!("{e:#}")))
        })
    }

    fn kill<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let cancel = self.active.lock().remove(&handle.worker_id);
            match (cancel, handle.pid) {
                (Some(cancel), _) => {
                    info!(agent_id = %handle.worker_id, "killing worker process");
                    if cancel.send(()).is_err() {
                        debug!(agent_id = %handle.worker_id, "worker already finished");
                    }
                }
                // Started by an earlier control process; only the pid is left.
                // An exit file means the pid may already belong to someone else.
                (None, Some(pid)) => {
                    if exited(handle).await {
                        debug!(agent_id = %handle.worker_id, "worker already exited");
                    } else {
                        kill_pid(pid).await?;
                    }
                }
                (None, None) => {
                    debug!(agent_id = %handle.worker_id, "no running process for worker");
                }
            }
            Ok(())
        })
    }
}

fn shell_command(script: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    }
}

fn pump_lines<R>(reader: R, stream: &'static str, worker_id: String, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(agent_id = %worker_id, "{stream}: {line}");
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

async fn write_log(mut log: File, mut rx: mpsc::Receiver<String>, worker_id: String) {
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        let written = async {
            log.write_all(&bytes).await?;
            log.flush().await
        };
        if let Err(e) = written.await {
            error!(agent_id = %worker_id, error = %e, "failed to append to worker log");
            break;
        }
    }
}

/// Wait for the worker to exit (or for a kill request), then record the
/// outcome in the exit file.
async fn supervise(
    mut child: Child,
    mut cancel_rx: oneshot::Receiver<()>,
    writer: JoinHandle<()>,
    exit_path: PathBuf,
    worker_id: String,
    active: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
) {
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                info!(agent_id = %worker_id, exit_code = code, "worker process exited");
                code.to_string()
            }
            Err(e) => {
                warn!(agent_id = %worker_id, error = %e, "failed to wait for worker process");
                "-1".to_string()
            }
        },

        // Also fires if the launcher was dropped; the child must not outlive it.
        _ = &mut cancel_rx => {
            if let Err(e) = child.kill().await {
                warn!(agent_id = %worker_id, error = %e, "failed to kill worker process");
            }
            KILLED_MARKER.to_string()
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(agent_id = %worker_id, "worker output still open after exit; log may be truncated");
    }

    if let Err(e) = fs::write(&exit_path, format!("{outcome}\n")).await {
        error!(agent_id = %worker_id, path = ?exit_path, error = %e, "failed to write exit file");
    }

    active.lock().remove(&worker_id);
}

async fn kill_pid(pid: u32) -> Result<()> {
    info!(pid, "killing worker by pid");
    let status = Command::new("kill")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        debug!(pid, "kill reported failure; process is probably gone");
    }
    Ok(())
}

async fn exited(handle: &WorkerHandle) -> bool {
    match &handle.exit_path {
        Some(path) => fs::try_exists(path).await.unwrap_or(false),
        None => false,
    }
}

async fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing stale {:?}", path)),
    }
}
