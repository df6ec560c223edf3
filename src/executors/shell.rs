// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Shell backend
//!
//! Runs each command with `<shell> -c` inside a per-job workspace under the
//! builds directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;

use super::{
    resolve_globs, workspace_path, CommandOutput, ExecutionBackend, JobInvocation, ScriptPhase,
    WorkspaceFile,
};
use crate::errors::PipewrightError;

/// Backend that runs commands through a local shell
#[derive(Debug, Clone)]
pub struct ShellBackend {
    shell: PathBuf,
    builds_dir: PathBuf,
}

impl ShellBackend {
    /// Create a backend using `shell`, resolved on `PATH`
    pub fn new(shell: &str, builds_dir: impl Into<PathBuf>) -> Result<Self, PipewrightError> {
        let shell = which::which(shell).map_err(|e| {
            PipewrightError::backend(
                "shell",
                e,
                Some(format!("Install '{}' or set 'shell' in pipewright.toml", shell)),
            )
        })?;

        Ok(Self {
            shell,
            builds_dir: builds_dir.into(),
        })
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Workspace directory of one job run
    ///
    /// Named `<job>-<job id>`; the sanitized name alone can collide.
    pub fn workspace(&self, invocation: &JobInvocation) -> PathBuf {
        let job: String = invocation
            .job_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.builds_dir
            .join(invocation.pipeline_id.to_string())
            .join(format!("{}-{}", job, invocation.job_id))
    }

    fn io_error(&self, context: &str, e: impl ToString) -> PipewrightError {
        PipewrightError::backend("shell", format!("{}: {}", context, e.to_string()), None)
    }
}

#[async_trait]
impl ExecutionBackend for ShellBackend {
    fn name(&self) -> &str {
        "shell"
    }

    async fn prepare(&self, invocation: &JobInvocation) -> Result<(), PipewrightError> {
        let dir = self.workspace(invocation);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| self.io_error(&format!("creating workspace {}", dir.display()), e))
    }

    async fn run_command(
        &self,
        invocation: &JobInvocation,
        phase: ScriptPhase,
        command: &str,
    ) -> Result<CommandOutput, PipewrightError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(self.workspace(invocation));
        cmd.envs(&invocation.env);
        cmd.kill_on_drop(true);

        tracing::trace!(job = %invocation.job_name, %phase, command, "Spawning shell command");

        let output = cmd.output().await.map_err(|e| {
            PipewrightError::backend(
                "shell",
                e,
                Some(format!("Shell '{}' may not be available", self.shell.display())),
            )
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }

    async fn collect(
        &self,
        invocation: &JobInvocation,
        patterns: &[String],
    ) -> Result<Vec<WorkspaceFile>, PipewrightError> {
        let root = self.workspace(invocation);
        let mut files = Vec::new();

        for path in resolve_globs(patterns, &root)? {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| self.io_error(&format!("reading {}", path.display()), e))?;
            let relative = path
                .strip_prefix(&root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(WorkspaceFile::new(relative, content));
        }

        Ok(files)
    }

    async fn restore(
        &self,
        invocation: &JobInvocation,
        files: &[WorkspaceFile],
    ) -> Result<(), PipewrightError> {
        let root = self.workspace(invocation);

        for file in files {
            let target = workspace_path(&root, &file.path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(&format!("creating {}", parent.display()), e))?;
            }
            tokio::fs::write(&target, &file.content)
                .await
                .map_err(|e| self.io_error(&format!("writing {}", target.display()), e))?;
        }

        Ok(())
    }

    async fn cleanup(&self, invocation: &JobInvocation) -> Result<(), PipewrightError> {
        let dir = self.workspace(invocation);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(&format!("removing {}", dir.display()), e)),
        }
    }
}
