// src/worker/probe.rs

//! Status probe that reads a worker's output log.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::WorkerSection;
use crate::errors::{Result, WavedagError};
use crate::types::ProbeState;

use super::WorkerHandle;
use super::backend::{BoxFuture, ProbeReport, StatusProbe};

/// A line such as `WAVEDAG_STATUS: complete`.
pub const DEFAULT_STATUS_PATTERN: &str = r"^WAVEDAG_STATUS:\s*(\w+)";

/// A line such as `Cost: $1.25`.
pub const DEFAULT_COST_PATTERN: &str = r"Cost: \$([0-9]+(?:\.[0-9]+)?)";

const ANSI_ESCAPE: &str = r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)";

/// Compiled output patterns. All patterns run in multi-line mode, so `^`
/// and `$` anchor at line boundaries.
#[derive(Debug, Clone)]
pub struct ProbePatterns {
    ansi: Regex,
    status: Regex,
    complete: Option<Regex>,
    failed: Option<Regex>,
    cost: Regex,
}

impl ProbePatterns {
    pub fn from_worker(worker: &WorkerSection) -> Result<Self> {
        let status = worker.status_pattern.as_deref().unwrap_or(DEFAULT_STATUS_PATTERN);
        let cost = worker.cost_pattern.as_deref().unwrap_or(DEFAULT_COST_PATTERN);

        Ok(Self {
            ansi: compile(ANSI_ESCAPE)?,
            status: compile(status)?,
            complete: worker.complete_pattern.as_deref().map(compile).transpose()?,
            failed: worker.failed_pattern.as_deref().map(compile).transpose()?,
            cost: compile(cost)?,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| WavedagError::ConfigError(format!("invalid worker pattern '{pattern}': {e}")))
}

/// Classifies a worker from its output log and exit file.
///
/// In order of precedence:
/// 1. `failed_pattern` / `complete_pattern` anywhere in the log;
/// 2. the last status line, if it names a final state;
/// 3. the exit file (`0` is complete, anything else failed);
/// 4. the last status line (`active` / `idle`);
/// 5. log growth since the previous probe (growth is activity).
///
/// The cost is the last cost match in the log, as an absolute value.
#[derive(Debug)]
pub struct OutputProbe {
    patterns: ProbePatterns,
    /// Log length seen at the previous probe, per worker.
    seen: Mutex<HashMap<String, usize>>,
}

impl OutputProbe {
    pub fn new(patterns: ProbePatterns) -> Self {
        Self {
            patterns,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_worker(worker: &WorkerSection) -> Result<Self> {
        Ok(Self::new(ProbePatterns::from_worker(worker)?))
    }

    /// Pure classification step used by [`StatusProbe::probe`].
    pub fn classify(&self, worker_id: &str, log: &str, exit: Option<&str>) -> ProbeReport {
        let text = self.patterns.ansi.replace_all(log, "");

        let grew = {
            let mut seen = self.seen.lock();
            let previous = seen.insert(worker_id.to_string(), text.len());
            previous.is_none_or(|p| text.len() > p)
        };

        let cost = self
            .patterns
            .cost
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .last();

        let reported = self
            .patterns
            .status
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .last()
            .and_then(|m| match m.as_str().parse::<ProbeState>() {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(agent_id = %worker_id, error = %e, "ignoring unrecognised status line");
                    None
                }
            });

        let matches = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(&text));

        let state = if matches(&self.patterns.failed) {
            ProbeState::Failed
        } else if matches(&self.patterns.complete) {
            ProbeState::Complete
        } else if let Some(final_state @ (ProbeState::Complete | ProbeState::Failed)) = reported {
            final_state
        } else if let Some(exit) = exit {
            match exit.trim() {
                "0" => ProbeState::Complete,
                other => {
                    debug!(agent_id = %worker_id, exit = other, "worker exited unsuccessfully");
                    ProbeState::Failed
                }
            }
        } else if let Some(state) = reported {
            state
        } else if grew {
            ProbeState::Active
        } else {
            ProbeState::Idle
        };

        if matches!(state, ProbeState::Complete | ProbeState::Failed) {
            self.seen.lock().remove(worker_id);
        }

        ProbeReport { state, cost }
    }
}

impl StatusProbe for OutputProbe {
    fn probe<'a>(&'a self, handle: &'a WorkerHandle) -> BoxFuture<'a, Result<ProbeReport>> {
        Box::pin(async move {
            let log = match &handle.log_path {
                Some(path) => read_optional(path).await?,
                None => None,
            };
            let exit = match &handle.exit_path {
                Some(path) => read_optional(path).await?,
                None => None,
            };
            Ok(self.classify(&handle.worker_id, log.as_deref().unwrap_or(""), exit.as_deref()))
        })
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> OutputProbe {
        OutputProbe::from_worker(&WorkerSection::default()).unwrap()
    }

    #[test]
    fn growth_is_activity_and_silence_is_idle() {
        let p = probe();
        assert_eq!(p.classify("w", "", None).state, ProbeState::Active);
        assert_eq!(p.classify("w", "", None).state, ProbeState::Idle);
        assert_eq!(p.classify("w", "working\n", None).state, ProbeState::Active);
        assert_eq!(p.classify("w", "working\n", None).state, ProbeState::Idle);
    }

    #[test]
    fn latest_cost_wins_and_ansi_is_stripped() {
        let p = probe();
        let log = "\x1b[32mCost: $1.50\x1b[0m\nmore work\n\x1b[1mCost: $\x1b[0m2.25\n";
        let report = p.classify("w", log, None);
        assert_eq!(report.cost, Some(2.25));
    }

    #[test]
    fn status_line_names_final_state() {
        let p = probe();
        let report = p.classify("w", "WAVEDAG_STATUS: active\nWAVEDAG_STATUS: done\n", None);
        assert_eq!(report.state, ProbeState::Complete);
    }

    #[test]
    fn exit_file_is_the_fallback() {
        let p = probe();
        assert_eq!(p.classify("a", "hello\n", Some("0\n")).state, ProbeState::Complete);
        assert_eq!(p.classify("b", "hello\n", Some("2\n")).state, ProbeState::Failed);
        assert_eq!(p.classify("c", "hello\n", Some("killed\n")).state, ProbeState::Failed);
    }

    #[test]
    fn explicit_failure_pattern_beats_clean_exit() {
        let worker = WorkerSection {
            failed_pattern: Some("^WAVEDAG: failed".into()),
            complete_pattern: Some("^WAVEDAG: complete".into()),
            ..WorkerSection::default()
        };
        let p = OutputProbe::from_worker(&worker).unwrap();
        let report = p.classify("w", "starting\nWAVEDAG: failed (tests red)\n", Some("0"));
        assert_eq!(report.state, ProbeState::Failed);
    }

    #[test]
    fn finished_workers_are_forgotten() {
        let p = probe();
        p.classify("a", "working\n", None);
        p.classify("b", "working\n", None);
        assert_eq!(p.seen.lock().len(), 2);

        assert_eq!(p.classify("a", "working\n", Some("0")).state, ProbeState::Complete);
        assert_eq!(
            p.classify("b", "working\nWAVEDAG_STATUS: failed\n", None).state,
            ProbeState::Failed
        );
        assert!(p.seen.lock().is_empty());
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let worker = WorkerSection {
            cost_pattern: Some("(unclosed".into()),
            ..WorkerSection::default()
        };
        assert!(matches!(
            OutputProbe::from_worker(&worker),
            Err(WavedagError::ConfigError(_))
        ));
    }
}
