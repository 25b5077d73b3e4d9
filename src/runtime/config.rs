//! Runtime configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("cannot read runtime config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid runtime config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value '{value}'")]
    Env { var: &'static str, value: String },
}

/// Configuration for the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for directory-mode fan-out. 1 runs jobs sequentially, 0 uses one per CPU.
    pub worker_count: usize,
    /// Root under which per-run working directories are created.
    pub scratch_dir: PathBuf,
    /// Check that every provided dataset path was emitted.
    pub verify_outputs: bool,
    /// Remove the working directory after a successful run.
    pub cleanup_on_success: bool,
    /// Executable search path overriding `PATH`, in `PATH` syntax.
    pub search_path: Option<String>,
    /// Directory that relative stage paths resolve against; the current directory if unset.
    pub base_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            scratch_dir: std::env::temp_dir(),
            verify_outputs: true,
            cleanup_on_success: false,
            search_path: None,
            base_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse TOML; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, RuntimeConfigError> {
        let content = fs::read_to_string(path).map_err(|source| RuntimeConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by `SIMEX_*` environment variables.
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, RuntimeConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeConfigError> {
        if let Some(value) = lookup("SIMEX_WORKERS") {
            self.worker_count = value.trim().parse().map_err(|_| RuntimeConfigError::Env {
                var: "SIMEX_WORKERS",
                value,
            })?;
        }
        if let Some(value) = lookup("SIMEX_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("SIMEX_SEARCH_PATH") {
            self.search_path = Some(value);
        }
        if let Some(value) = lookup("SIMEX_VERIFY_OUTPUTS") {
            self.verify_outputs = parse_flag(&value).ok_or(RuntimeConfigError::Env {
                var: "SIMEX_VERIFY_OUTPUTS",
                value,
            })?;
        }
        Ok(self)
    }

    /// Number of fan-out workers after resolving 0 to the CPU count.
    pub fn effective_workers(&self) -> usize {
        match self.worker_count {
            0 => num_cpus::get(),
            n => n,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
