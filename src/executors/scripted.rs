// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Scripted backend
//!
//! Runs nothing. Commands succeed unless the job was configured to fail or
//! the command is `exit N`. Everything the backend is asked to do is
//! recorded so callers can inspect ordering, runner use and concurrency.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{CommandOutput, ExecutionBackend, JobInvocation, ScriptPhase, WorkspaceFile};
use crate::errors::PipewrightError;
use crate::ids::{PipelineId, RunnerId};

/// A command the backend was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub pipeline_id: PipelineId,
    pub job: String,
    pub attempt: u32,
    pub runner: RunnerId,
    pub phase: ScriptPhase,
    pub command: String,
}

/// Workspace lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Prepared { job: String, runner: RunnerId },
    CleanedUp { job: String, runner: RunnerId },
}

#[derive(Debug, Default)]
struct ScriptedState {
    commands: Vec<RecordedCommand>,
    events: Vec<BackendEvent>,
    active_by_runner: HashMap<RunnerId, usize>,
    runner_overlap: bool,
    active: usize,
    max_active: usize,
    attempts: HashMap<String, u32>,
    restored: HashMap<String, Vec<WorkspaceFile>>,
}

/// Deterministic in-memory backend
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    /// Job name to number of failing attempts; `u32::MAX` fails every attempt
    failures: HashMap<String, u32>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    outputs: HashMap<String, Vec<WorkspaceFile>>,
    state: Mutex<ScriptedState>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every attempt of `job` fail in its script
    pub fn fail_job(self, job: impl Into<String>) -> Self {
        self.failing_attempts(job, u32::MAX)
    }

    /// Make the first `attempts` attempts of `job` fail
    pub fn failing_attempts(mut self, job: impl Into<String>, attempts: u32) -> Self {
        self.failures.insert(job.into(), attempts);
        self
    }

    /// Make each script command of `job` take `delay`
    pub fn with_delay(mut self, job: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(job.into(), delay);
        self
    }

    /// Make each script command of every job take `delay`
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Files `job` leaves in its workspace
    pub fn with_output(
        mut self,
        job: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.outputs
            .entry(job.into())
            .or_default()
            .push(WorkspaceFile::new(path, content));
        self
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    /// Commands run for one job
    pub fn commands_for(&self, job: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.job == job)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.lock().events.clone()
    }

    /// Whether any job was ever prepared for a runner already in use
    pub fn runner_overlap(&self) -> bool {
        self.lock().runner_overlap
    }

    /// Highest number of jobs active at once
    pub fn max_concurrency(&self) -> usize {
        self.lock().max_active
    }

    /// Highest attempt number seen for `job`
    pub fn attempts(&self, job: &str) -> u32 {
        self.lock().attempts.get(job).copied().unwrap_or(0)
    }

    /// Whether `job` ran any command
    pub fn ran(&self, job: &str) -> bool {
        self.lock().commands.iter().any(|c| c.job == job)
    }

    /// Files restored into `job`'s workspace
    pub fn restored(&self, job: &str) -> Vec<WorkspaceFile> {
        self.lock().restored.get(job).cloned().unwrap_or_default()
    }

    fn should_fail(&self, job: &str, attempt: u32) -> bool {
        self.failures.get(job).is_some_and(|n| attempt <= *n)
    }
}

fn requested_exit(command: &str) -> Option<i32> {
    command.trim().strip_prefix("exit ")?.trim().parse().ok()
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let dir = pattern.trim_end_matches('/');
    if path == dir || path.starts_with(&format!("{}/", dir)) {
        return true;
    }
    glob::Pattern::new(pattern).is_ok_and(|p| p.matches(path))
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn prepare(&self, invocation: &JobInvocation) -> Result<(), PipewrightError> {
        let mut state = self.lock();
        let on_runner = state
            .active_by_runner
            .entry(invocation.runner_id.clone())
            .or_insert(0);
        *on_runner += 1;
        if *on_runner > 1 {
            state.runner_overlap = true;
        }
        state.active += 1;
        state.max_active = state.max_active.max(state.active);
        state.events.push(BackendEvent::Prepared {
            job: invocation.job_name.clone(),
            runner: invocation.runner_id.clone(),
        });
        Ok(())
    }

    async fn run_command(
        &self,
        invocation: &JobInvocation,
        phase: ScriptPhase,
        command: &str,
    ) -> Result<CommandOutput, PipewrightError> {
        let start = Instant::now();
        {
            let mut state = self.lock();
            state.commands.push(RecordedCommand {
                pipeline_id: invocation.pipeline_id,
                job: invocation.job_name.clone(),
                attempt: invocation.attempt,
                runner: invocation.runner_id.clone(),
                phase,
                command: command.to_string(),
            });
            let seen = state.attempts.entry(invocation.job_name.clone()).or_insert(0);
            *seen = (*seen).max(invocation.attempt);
        }

        if phase == ScriptPhase::Script {
            let delay = self
                .delays
                .get(&invocation.job_name)
                .copied()
                .unwrap_or(self.default_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(code) = requested_exit(command) {
            return Ok(if code == 0 {
                CommandOutput::success("", start.elapsed())
            } else {
                CommandOutput::failure(code, format!("exit {}", code), start.elapsed())
            });
        }

        if phase == ScriptPhase::Script && self.should_fail(&invocation.job_name, invocation.attempt)
        {
            return Ok(CommandOutput::failure(
                1,
                format!("{} failed", command),
                start.elapsed(),
            ));
        }

        Ok(CommandOutput::success(format!("ran {}", command), start.elapsed()))
    }

    async fn collect(
        &self,
        invocation: &JobInvocation,
        patterns: &[String],
    ) -> Result<Vec<WorkspaceFile>, PipewrightError> {
        let produced = self
            .outputs
            .get(&invocation.job_name)
            .into_iter()
            .flatten()
            .filter(|f| patterns.iter().any(|p| path_matches(p, &f.path)));
        let restored = self
            .lock()
            .restored
            .get(&invocation.job_name)
            .cloned()
            .unwrap_or_default();

        let mut files: Vec<WorkspaceFile> = restored
            .into_iter()
            .filter(|f| patterns.iter().any(|p| path_matches(p, &f.path)))
            .collect();
        for file in produced {
            files.retain(|f| f.path != file.path);
            files.push(file.clone());
        }
        Ok(files)
    }

    async fn restore(
        &self,
        invocation: &JobInvocation,
        files: &[WorkspaceFile],
    ) -> Result<(), PipewrightError> {
        let mut state = self.lock();
        let restored = state
            .restored
            .entry(invocation.job_name.clone())
            .or_default();
        for file in files {
            restored.retain(|f| f.path != file.path);
            restored.push(file.clone());
        }
        Ok(())
    }

    async fn cleanup(&self, invocation: &JobInvocation) -> Result<(), PipewrightError> {
        let mut state = self.lock();
        if let Some(count) = state.active_by_runner.get_mut(&invocation.runner_id) {
            *count = count.saturating_sub(1);
        }
        state.active = state.active.saturating_sub(1);
        state.events.push(BackendEvent::CleanedUp {
            job: invocation.job_name.clone(),
            runner: invocation.runner_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::JobId;
    use std::collections::BTreeMap;

    fn invocation(job: &str, runner: &str, attempt: u32) -> JobInvocation {
        JobInvocation {
            pipeline_id: PipelineId::new(),
            job_id: JobId::new(),
            job_name: job.into(),
            stage: "test".into(),
            attempt,
            runner_id: RunnerId::from(runner),
            image: None,
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_failing_attempts_then_success() {
        let backend = ScriptedBackend::new().failing_attempts("flaky", 2);

        for attempt in 1..=2 {
            let out = backend
                .run_command(&invocation("flaky", "r1", attempt), ScriptPhase::Script, "make")
                .await
                .unwrap();
            assert!(!out.succeeded());
        }
        let out = backend
            .run_command(&invocation("flaky", "r1", 3), ScriptPhase::Script, "make")
            .await
            .unwrap();
        assert!(out.succeeded());
        assert_eq!(backend.attempts("flaky"), 3);
    }

    #[tokio::test]
    async fn test_exit_commands() {
        let backend = ScriptedBackend::new();
        let inv = invocation("job", "r1", 1);
        let out = backend
            .run_command(&inv, ScriptPhase::AfterScript, "exit 7")
            .await
            .unwrap();
        assert_eq!(out.exit_code, 7);
    }

    #[tokio::test]
    async fn test_overlap_detection() {
        let backend = ScriptedBackend::new();
        let a = invocation("a", "r1", 1);
        let b = invocation("b", "r1", 1);

        backend.prepare(&a).await.unwrap();
        backend.cleanup(&a).await.unwrap();
        backend.prepare(&b).await.unwrap();
        assert!(!backend.runner_overlap());

        backend.prepare(&a).await.unwrap();
        assert!(backend.runner_overlap());
        assert_eq!(backend.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_collect_matches_patterns() {
        let backend = ScriptedBackend::new()
            .with_output("build", "dist/app", "bin")
            .with_output("build", "logs/build.log", "log");
        let inv = invocation("build", "r1", 1);

        let files = backend.collect(&inv, &["dist/".into()]).await.unwrap();
        assert_eq!(files, vec![WorkspaceFile::new("dist/app", "bin")]);

        let files = backend.collect(&inv, &["**/*.log".into()]).await.unwrap();
        assert_eq!(files.len(), 1);
    }
}
