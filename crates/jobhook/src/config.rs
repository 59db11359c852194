//! Policy engine configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::marshal::UnknownFieldPolicy;

/// Default directory holding `job_submit.rhai`.
pub const DEFAULT_SCRIPT_DIR: &str = "/etc/slurm/job_submit";

/// Default plugin identity used to prefix script log lines.
pub const DEFAULT_PLUGIN_NAME: &str = "job_submit/rhai";

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Optional bounds on script execution.
///
/// Every limit is off by default, so a script that never terminates blocks
/// all submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum number of operations per call
    pub max_operations: Option<u64>,
    /// Maximum function call nesting depth
    pub max_call_depth: Option<usize>,
    /// Maximum length of any string, in bytes
    pub max_string_size: Option<usize>,
    /// Maximum number of elements in any array
    pub max_array_size: Option<usize>,
    /// Maximum number of entries in any map
    pub max_map_size: Option<usize>,
}

/// Configuration for a [`PolicyEngine`](crate::PolicyEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Directory holding the policy script, also searched by `import`
    pub script_dir: PathBuf,
    /// Tear the engine down after every call so script edits take effect
    pub reload_each_call: bool,
    /// Prefix for script log lines
    pub plugin_name: String,
    /// Handling of job view keys that name no known field
    pub unknown_fields: UnknownFieldPolicy,
    /// Script execution limits
    pub limits: ScriptLimits,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from(DEFAULT_SCRIPT_DIR),
            reload_each_call: true,
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            unknown_fields: UnknownFieldPolicy::default(),
            limits: ScriptLimits::default(),
        }
    }
}

impl PolicyConfig {
    /// Load a configuration from a JSON file.
    ///
    /// Keys missing from the file take their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded policy config");
        Ok(config)
    }

    /// Use `dir` as the script directory.
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    /// Set whether the engine is torn down after each call.
    pub fn with_reload_each_call(mut self, reload: bool) -> Self {
        self.reload_each_call = reload;
        self
    }

    /// Set the unknown field policy.
    pub fn with_unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }

    /// Set the script limits.
    pub fn with_limits(mut self, limits: ScriptLimits) -> Self {
        self.limits = limits;
        self
    }
}
