use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::priority::SeverityMap;

pub const RESULTS_DIR_ENV: &str = "HARNESS_RESULTS_DIR";
pub const SCRATCH_DIR_ENV: &str = "HARNESS_SCRATCH_DIR";

/// Settings for the logger registry and its result sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Directory receiving one JSON result per finished logger; `None` writes nothing.
    pub results_dir: Option<PathBuf>,
    /// Base of the per-container scratch directory published to running units.
    pub scratch_root: PathBuf,
    pub severity_map: SeverityMap,
    /// Strip ANSI colour sequences from output written into results.
    pub strip_ansi_in_results: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            results_dir: None,
            scratch_root: env::temp_dir().join("harness"),
            severity_map: SeverityMap::default(),
            strip_ansi_in_results: false,
        }
    }
}

impl LogConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlays `HARNESS_RESULTS_DIR` / `HARNESS_SCRATCH_DIR` when set and non-empty.
    pub fn apply_env(mut self) -> Self {
        if let Some(dir) = non_empty_env(RESULTS_DIR_ENV) {
            self.results_dir = Some(dir);
        }
        if let Some(dir) = non_empty_env(SCRATCH_DIR_ENV) {
            self.scratch_root = dir;
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
