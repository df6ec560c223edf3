// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Engine configuration
//!
//! Loaded from `pipewright.toml`. Every field has a default, so an empty
//! file (or no file) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::PipewrightError;

/// File name looked up in the project directory
pub const CONFIG_FILE: &str = "pipewright.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt timeout for jobs that set none
    pub default_timeout_secs: u64,

    /// How often schedulers re-check for free runners
    pub runner_poll_interval_ms: u64,

    /// Artifact lifetime for jobs that set no `expire_in`
    pub artifact_expire_in_secs: u64,

    /// Root of per-job workspaces for the shell backend
    pub builds_dir: PathBuf,

    /// Directory of the filesystem blob store; blobs stay in memory if unset
    pub blob_dir: Option<PathBuf>,

    /// Shell used by the shell backend
    pub shell: String,

    /// Runners registered at startup
    pub runners: Vec<RunnerConfig>,

    /// Environments declared at startup
    pub environments: Vec<EnvironmentConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3600,
            runner_poll_interval_ms: 100,
            artifact_expire_in_secs: 30 * 24 * 3600,
            builds_dir: PathBuf::from(".pipewright/builds"),
            blob_dir: None,
            shell: "bash".to_string(),
            runners: Vec::new(),
            environments: Vec::new(),
        }
    }
}

/// A runner declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An environment declared in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, PipewrightError> {
        let content = std::fs::read_to_string(path).map_err(|e| PipewrightError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipewrightError> {
        toml::from_str(content).map_err(Into::into)
    }

    pub fn to_toml(&self) -> Result<String, PipewrightError> {
        toml::to_string_pretty(self).map_err(|e| PipewrightError::Toml {
            message: e.to_string(),
        })
    }

    /// Find the configuration for `project_root`
    ///
    /// Looks for `pipewright.toml` in the project, then in the user's config
    /// directory, and falls back to defaults.
    pub fn discover(project_root: &Path) -> Result<Self, PipewrightError> {
        let local = project_root.join(CONFIG_FILE);
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "pipewright") {
            let global = dirs.config_dir().join(CONFIG_FILE);
            if global.exists() {
                return Self::from_file(&global);
            }
        }

        Ok(Self::default())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn runner_poll_interval(&self) -> Duration {
        Duration::from_millis(self.runner_poll_interval_ms.max(1))
    }

    pub fn artifact_expire_in(&self) -> Duration {
        Duration::from_secs(self.artifact_expire_in_secs)
    }

    /// Add `count` untagged local runners
    pub fn with_local_runners(mut self, count: usize) -> Self {
        let start = self.runners.len();
        for i in 0..count {
            self.runners.push(RunnerConfig {
                id: format!("local-{}", start + i + 1),
                name: None,
                tags: Vec::new(),
            });
        }
        self
    }
}
