// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{DagFile, RawDagFile};
use crate::errors::Result;

/// Environment variable that overrides the default state directory.
pub const STATE_DIR_ENV: &str = "WAVEDAG_STATE_DIR";

/// Load a DAG file from a given path and return the raw `RawDagFile`.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML. This
/// only performs deserialization; use [`load_and_validate`] for semantic
/// checks and wave planning.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawDagFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let raw: RawDagFile = if is_json {
        serde_json::from_str(&contents)?
    } else {
        toml::from_str(&contents)?
    };

    Ok(raw)
}

/// Load a DAG file from path, validate it and plan its waves.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML/JSON.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for unknown dependencies, cycles, and config sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<DagFile> {
    let raw = load_from_path(&path)?;
    DagFile::try_from(raw)
}

/// Resolve the state directory: explicit CLI value, then `WAVEDAG_STATE_DIR`,
/// then `.wavedag` in the current working directory.
pub fn resolve_state_dir(cli_value: Option<&Path>) -> PathBuf {
    if let Some(dir) = cli_value {
        return dir.to_path_buf();
    }
    std::env::var_os(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".wavedag"))
}
