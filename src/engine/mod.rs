// src/engine/mod.rs

//! Orchestration engine for wavedag.
//!
//! The per-wave bookkeeping lives in the pure [`wave`] core; the async shell
//! that spawns, polls and persists is [`runner`]. [`tick`] abstracts the wait
//! between polling rounds.

use std::fmt;

use crate::errors::WavedagError;

pub mod runner;
pub mod tick;
pub mod wave;

pub use runner::{AbortHandle, RunRequest, Runner};
pub use tick::{IntervalTicker, SteppingTicker, Ticker};
pub use wave::{WaveExecution, WaveResolution};

/// Where a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Start from wave 0. Creates the session if it does not exist yet.
    Fresh,
    /// Continue after the last completed wave.
    Resume,
    /// Restart at the given wave; it and all later waves are reset.
    FromWave(usize),
}

/// Result of a run, mapped one-to-one onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    BudgetExceeded,
    FatalConfigError,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Failure => 1,
            RunOutcome::BudgetExceeded => 2,
            RunOutcome::FatalConfigError => 3,
        }
    }
}

impl From<&WavedagError> for RunOutcome {
    /// Outcome for a run that ended in an error instead of a verdict.
    fn from(err: &WavedagError) -> Self {
        match err {
            WavedagError::ConfigError(_)
            | WavedagError::Validation(_)
            | WavedagError::TomlError(_)
            | WavedagError::JsonError(_)
            | WavedagError::SessionNotFound(_)
            | WavedagError::StateCorruption { .. } => RunOutcome::FatalConfigError,
            _ => RunOutcome::Failure,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Success => "success",
            RunOutcome::Failure => "failure",
            RunOutcome::BudgetExceeded => "budget exceeded",
            RunOutcome::FatalConfigError => "fatal config error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes: Vec<_> = [
            RunOutcome::Success,
            RunOutcome::Failure,
            RunOutcome::BudgetExceeded,
            RunOutcome::FatalConfigError,
        ]
        .into_iter()
        .map(RunOutcome::exit_code)
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn config_errors_map_to_fatal_outcome() {
        let cycle = WavedagError::Validation(crate::errors::ValidationError::CyclicDependency {
            node: "A".into(),
        });
        assert_eq!(RunOutcome::from(&cycle), RunOutcome::FatalConfigError);
    }

    #[test]
    fn missing_or_corrupt_session_is_fatal_not_a_wave_failure() {
        assert_eq!(
            RunOutcome::from(&WavedagError::SessionNotFound("s".into())),
            RunOutcome::FatalConfigError
        );
        let corrupt = WavedagError::StateCorruption {
            path: "/state/sessions/s.json".into(),
            reason: "expected value".into(),
        };
        assert_eq!(RunOutcome::from(&corrupt).exit_code(), 3);
    }
}
