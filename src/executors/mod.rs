// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Execution backends
//!
//! The job executor drives a job through an [`ExecutionBackend`]: prepare a
//! workspace, restore dependency files, run each command, collect declared
//! paths and clean up. [`ShellBackend`] runs commands for real;
//! [`ScriptedBackend`] is deterministic and records what it was asked to do.

mod scripted;
mod shell;

pub use scripted::ScriptedBackend;
pub use shell::ShellBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::errors::PipewrightError;
use crate::ids::{JobId, PipelineId, RunnerId};

/// Everything a backend needs to know about the job it runs
#[derive(Debug, Clone)]
pub struct JobInvocation {
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub job_name: String,
    pub stage: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub runner_id: RunnerId,
    pub image: Option<String>,
    /// Variables visible to the job, predefined `CI_*` ones included
    pub env: BTreeMap<String, String>,
}

/// Script section a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    BeforeScript,
    Script,
    AfterScript,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeScript => write!(f, "before_script"),
            Self::Script => write!(f, "script"),
            Self::AfterScript => write!(f, "after_script"),
        }
    }
}

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// A file moved between a workspace and the artifact or cache store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root, `/`-separated
    pub path: String,
    pub content: Vec<u8>,
}

impl WorkspaceFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Where and how job commands run
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name used in logs and errors
    fn name(&self) -> &str;

    /// Set up the job workspace before the first command
    async fn prepare(&self, invocation: &JobInvocation) -> Result<(), PipewrightError>;

    /// Run one command
    ///
    /// A non-zero exit code is a normal result; `Err` means the backend
    /// itself failed.
    async fn run_command(
        &self,
        invocation: &JobInvocation,
        phase: ScriptPhase,
        command: &str,
    ) -> Result<CommandOutput, PipewrightError>;

    /// Gather the workspace files matching `patterns`
    async fn collect(
        &self,
        invocation: &JobInvocation,
        patterns: &[String],
    ) -> Result<Vec<WorkspaceFile>, PipewrightError>;

    /// Place files into the job workspace
    async fn restore(
        &self,
        invocation: &JobInvocation,
        files: &[WorkspaceFile],
    ) -> Result<(), PipewrightError>;

    /// Tear down the workspace after the last attempt
    async fn cleanup(&self, _invocation: &JobInvocation) -> Result<(), PipewrightError> {
        Ok(())
    }
}

/// Resolve a workspace-relative path, refusing anything that escapes `root`
pub fn workspace_path(root: &Path, relative: &str) -> Result<PathBuf, PipewrightError> {
    let rel = Path::new(relative);
    let escapes = rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
    if escapes || relative.is_empty() {
        return Err(PipewrightError::Io {
            message: format!("path '{}' escapes the job workspace", relative),
        });
    }
    Ok(root.join(rel))
}

/// Resolve glob patterns against `base_dir`, expanding matched directories
pub fn resolve_globs(patterns: &[String], base_dir: &Path) -> Result<Vec<PathBuf>, PipewrightError> {
    let mut files = Vec::new();

    for pattern in patterns {
        let trimmed = pattern.trim_end_matches('/');
        let full_pattern = base_dir.join(trimmed).to_string_lossy().to_string();

        for entry in glob::glob(&full_pattern)?.filter_map(Result::ok) {
            if entry.is_dir() {
                let nested = entry.join("**").join("*").to_string_lossy().to_string();
                files.extend(
                    glob::glob(&nested)?
                        .filter_map(Result::ok)
                        .filter(|p| p.is_file()),
                );
            } else if entry.is_file() {
                files.push(entry);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
