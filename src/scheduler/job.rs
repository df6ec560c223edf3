// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Job executor
//!
//! Runs one job on a claimed runner: restore dependency artifacts, pull the
//! cache, run the scripts with retries and a per-attempt deadline, then
//! store artifacts and push the cache. The executor never touches pipeline
//! state; it returns a [`JobReport`] the scheduler applies.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{cache_key, Artifact, ArtifactStore, CacheStore};
use crate::executors::{ExecutionBackend, JobInvocation, ScriptPhase};
use crate::ids::{JobId, PipelineId, RunnerId};
use crate::pipeline::variables::{expand, mask};
use crate::pipeline::{JobLog, JobReason, JobSpec, JobStatus, LogEntry, LogLevel};
use crate::runners::{RunnerLease, RunnerPool};

/// Defaults applied to jobs that do not set their own
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub default_timeout: Duration,
    pub artifact_expire_in: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            artifact_expire_in: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Everything needed to run one job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub spec: JobSpec,
    /// Variables visible to the job
    pub env: BTreeMap<String, String>,
    /// Values redacted from the job log
    pub masked: Vec<String>,
    /// Artifacts of successful `needs`, restored before the scripts
    pub dependency_artifacts: Vec<Artifact>,
    pub cancel: CancellationToken,
}

/// Outcome of a job, applied to the job record by the scheduler
#[derive(Debug, Clone)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
    pub reason: Option<JobReason>,
    pub attempts: u32,
    pub runner_id: Option<RunnerId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
    pub log: Vec<LogEntry>,
}

/// Result of trying to claim a runner
pub enum JobStart {
    /// No runner free; the context is handed back unchanged
    Deferred(JobContext),
    Started(RunningJob),
}

/// Result of [`JobExecutor::run`]
pub enum JobRunOutcome {
    Deferred(JobContext),
    Finished(JobReport),
}

/// Claims runners and drives jobs through an execution backend
pub struct JobExecutor {
    pool: Arc<RunnerPool>,
    backend: Arc<dyn ExecutionBackend>,
    artifacts: Arc<ArtifactStore>,
    cache: Arc<CacheStore>,
    settings: ExecutorSettings,
}

impl JobExecutor {
    pub fn new(
        pool: Arc<RunnerPool>,
        backend: Arc<dyn ExecutionBackend>,
        artifacts: Arc<ArtifactStore>,
        cache: Arc<CacheStore>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            pool,
            backend,
            artifacts,
            cache,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<RunnerPool> {
        &self.pool
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    /// Claim a runner for the job without running it
    pub fn try_start(&self, ctx: JobContext) -> JobStart {
        match self.pool.acquire(&ctx.spec.tags, ctx.job_id) {
            Some(lease) => JobStart::Started(RunningJob {
                ctx,
                lease,
                started_at: Utc::now(),
                backend: Arc::clone(&self.backend),
                artifacts: Arc::clone(&self.artifacts),
                cache: Arc::clone(&self.cache),
                settings: self.settings,
            }),
            None => JobStart::Deferred(ctx),
        }
    }

    /// Claim a runner and run the job to completion
    pub async fn run(&self, ctx: JobContext) -> JobRunOutcome {
        match self.try_start(ctx) {
            JobStart::Started(job) => JobRunOutcome::Finished(job.execute().await),
            JobStart::Deferred(ctx) => JobRunOutcome::Deferred(ctx),
        }
    }
}

/// A job holding a runner, ready to execute
pub struct RunningJob {
    ctx: JobContext,
    lease: RunnerLease,
    started_at: DateTime<Utc>,
    backend: Arc<dyn ExecutionBackend>,
    artifacts: Arc<ArtifactStore>,
    cache: Arc<CacheStore>,
    settings: ExecutorSettings,
}

enum AttemptResult {
    Success,
    Failed(JobReason),
    Canceled,
}

impl RunningJob {
    pub fn runner_id(&self) -> &RunnerId {
        self.lease.runner_id()
    }

    pub fn name(&self) -> &str {
        &self.ctx.spec.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn invocation(&self, attempt: u32) -> JobInvocation {
        let mut env = self.ctx.env.clone();
        env.insert("CI_JOB_ATTEMPT".into(), attempt.to_string());
        env.insert("CI_RUNNER_ID".into(), self.runner_id().to_string());
        JobInvocation {
            pipeline_id: self.ctx.pipeline_id,
            job_id: self.ctx.job_id,
            job_name: self.ctx.spec.name.clone(),
            stage: self.ctx.spec.stage.clone(),
            attempt,
            runner_id: self.runner_id().clone(),
            image: self.ctx.spec.image.clone(),
            env,
        }
    }

    /// Run the job and release the runner
    pub async fn execute(self) -> JobReport {
        let spec = &self.ctx.spec;
        let mut log = JobLog::new(self.ctx.masked.clone());
        let runner = self.runner_id().clone();
        let timeout = spec.timeout.unwrap_or(self.settings.default_timeout);
        let max_attempts = spec.max_attempts();

        tracing::info!(
            pipeline = %self.ctx.pipeline_id,
            job = %spec.name,
            runner = %runner,
            "Job started"
        );
        log.info(format!(
            "Running on runner {} with the {} backend",
            runner,
            self.backend.name()
        ));

        let mut attempts = 0;
        let mut result = AttemptResult::Failed(JobReason::SystemFailure {
            message: "job never ran".into(),
        });

        let first = self.invocation(1);
        let prepared = tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(None),
            r = self.backend.prepare(&first) => r.map_err(Some),
        };

        match prepared {
            Err(None) => result = AttemptResult::Canceled,
            Err(Some(e)) => {
                log.error(format!("Failed to prepare workspace: {}", e));
                result = AttemptResult::Failed(JobReason::SystemFailure {
                    message: e.to_string(),
                });
            }
            Ok(()) => {
                while attempts < max_attempts {
                    attempts += 1;
                    let invocation = self.invocation(attempts);
                    log.info(format!("Attempt {}/{}", attempts, max_attempts));

                    result = tokio::select! {
                        _ = self.ctx.cancel.cancelled() => AttemptResult::Canceled,
                        r = tokio::time::timeout(timeout, self.attempt(&invocation, &mut log)) => match r {
                            Ok(Ok(())) => AttemptResult::Success,
                            Ok(Err(reason)) => AttemptResult::Failed(reason),
                            Err(_) => AttemptResult::Failed(JobReason::TimeoutExceeded {
                                timeout_ms: timeout.as_millis() as u64,
                            }),
                        },
                    };

                    match &result {
                        AttemptResult::Success | AttemptResult::Canceled => break,
                        AttemptResult::Failed(reason) => {
                            log.error(format!("Attempt {} failed: {}", attempts, reason));
                            tracing::warn!(
                                pipeline = %self.ctx.pipeline_id,
                                job = %spec.name,
                                attempt = attempts,
                                %reason,
                                "Job attempt failed"
                            );
                        }
                    }
                }
            }
        }

        let mut artifacts = Vec::new();
        if matches!(result, AttemptResult::Success) {
            let last = self.invocation(attempts);
            let finished = tokio::select! {
                _ = self.ctx.cancel.cancelled() => None,
                r = self.finish(&last, &mut log) => Some(r),
            };
            match finished {
                None => result = AttemptResult::Canceled,
                Some(Ok(stored)) => artifacts = stored,
                Some(Err(reason)) => result = AttemptResult::Failed(reason),
            }
        }

        if let Err(e) = self.backend.cleanup(&first).await {
            log.warn(format!("Workspace cleanup failed: {}", e));
        }

        let (status, reason) = match result {
            AttemptResult::Success => (JobStatus::Success, None),
            AttemptResult::Failed(reason) => (JobStatus::Failed, Some(reason)),
            AttemptResult::Canceled => {
                log.warn("Job canceled");
                (JobStatus::Canceled, Some(JobReason::Canceled))
            }
        };
        log.info(format!("Job finished with status {}", status));

        tracing::info!(
            pipeline = %self.ctx.pipeline_id,
            job = %spec.name,
            %status,
            attempts,
            "Job finished"
        );

        let report = JobReport {
            name: spec.name.clone(),
            status,
            reason,
            attempts,
            runner_id: Some(runner),
            started_at: self.started_at,
            finished_at: Utc::now(),
            artifacts,
            log: log.into_entries(),
        };

        if let Err(e) = self.lease.release() {
            tracing::warn!(job = %report.name, error = %e, "Runner release failed");
        }
        report
    }

    /// One attempt: restore inputs, then the scripts
    async fn attempt(
        &self,
        invocation: &JobInvocation,
        log: &mut JobLog,
    ) -> Result<(), JobReason> {
        let system = |e: crate::errors::PipewrightError| JobReason::SystemFailure {
            message: e.to_string(),
        };

        if !self.ctx.dependency_artifacts.is_empty() {
            let files = self
                .artifacts
                .files(&self.ctx.dependency_artifacts)
                .await
                .map_err(system)?;
            self.backend.restore(invocation, &files).await.map_err(system)?;
            log.info(format!("Restored {} artifact file(s) from dependencies", files.len()));
        }

        self.pull_cache(invocation, log).await;

        let spec = &self.ctx.spec;
        let main = self
            .run_phase(invocation, ScriptPhase::BeforeScript, &spec.before_script, log)
            .await;
        let main = match main {
            Ok(()) => {
                self.run_phase(invocation, ScriptPhase::Script, &spec.script, log)
                    .await
            }
            Err(reason) => Err(reason),
        };

        if !spec.after_script.is_empty() {
            if let Err(reason) = self
                .run_phase(invocation, ScriptPhase::AfterScript, &spec.after_script, log)
                .await
            {
                log.warn(format!("after_script failed: {}", reason));
            }
        }

        main
    }

    /// Run commands in order, stopping at the first failure
    async fn run_phase(
        &self,
        invocation: &JobInvocation,
        phase: ScriptPhase,
        commands: &[String],
        log: &mut JobLog,
    ) -> Result<(), JobReason> {
        for command in commands {
            let expanded = expand(command, &invocation.env);
            log.info(format!("$ {}", expanded));

            let output = self
                .backend
                .run_command(invocation, phase, &expanded)
                .await
                .map_err(|e| JobReason::SystemFailure {
                    message: e.to_string(),
                })?;

            log.output(LogLevel::Info, &output.stdout);
            log.output(LogLevel::Warning, &output.stderr);

            if !output.succeeded() {
                return Err(JobReason::ScriptFailure {
                    command: mask(&expanded, &self.ctx.masked),
                    exit_code: output.exit_code,
                });
            }
        }
        Ok(())
    }

    fn cache_key(&self) -> Option<String> {
        let cache = self.ctx.spec.cache.as_ref()?;
        let explicit = cache.key.as_ref().map(|k| expand(k, &self.ctx.env));
        Some(cache_key(
            &self.ctx.spec.name,
            &cache.paths,
            explicit.as_deref(),
        ))
    }

    async fn pull_cache(&self, invocation: &JobInvocation, log: &mut JobLog) {
        let Some(cache) = self.ctx.spec.cache.as_ref().filter(|c| c.policy.pulls()) else {
            return;
        };
        let Some(key) = self.cache_key() else {
            return;
        };

        match self.cache.pull(&key).await {
            Ok(Some(files)) => match self.backend.restore(invocation, &files).await {
                Ok(()) => log.info(format!("Cache '{}' restored ({} file(s))", key, files.len())),
                Err(e) => log.warn(format!("Cache restore failed: {}", e)),
            },
            Ok(None) => log.info(format!("Cache '{}' not found for {:?}", key, cache.paths)),
            Err(e) => log.warn(format!("Cache pull failed: {}", e)),
        }
    }

    /// Store artifacts and push the cache after a successful attempt
    async fn finish(
        &self,
        invocation: &JobInvocation,
        log: &mut JobLog,
    ) -> Result<Vec<Artifact>, JobReason> {
        let spec = &self.ctx.spec;
        let mut stored = Vec::new();

        if let Some(declared) = &spec.artifacts {
            let system = |e: crate::errors::PipewrightError| JobReason::SystemFailure {
                message: format!("artifact upload failed: {}", e),
            };
            let files = self
                .backend
                .collect(invocation, &declared.paths)
                .await
                .map_err(system)?;
            if files.is_empty() {
                log.warn(format!("No files matched artifacts {:?}", declared.paths));
            }

            let expire_in = declared.expire_in.unwrap_or(self.settings.artifact_expire_in);
            for file in &files {
                let artifact = self
                    .artifacts
                    .store(
                        self.ctx.pipeline_id,
                        self.ctx.job_id,
                        &spec.name,
                        file,
                        Some(expire_in),
                    )
                    .await
                    .map_err(system)?;
                stored.push(artifact);
            }
            log.info(format!("Uploaded {} artifact(s)", stored.len()));
        }

        if let Some(cache) = spec.cache.as_ref().filter(|c| c.policy.pushes()) {
            if let Some(key) = self.cache_key() {
                match self.backend.collect(invocation, &cache.paths).await {
                    Ok(files) => match self.cache.push(&key, &files, Some(self.ctx.job_id)).await {
                        Ok(entry) => log.info(format!(
                            "Cache '{}' saved ({} file(s), {} bytes)",
                            key, entry.files, entry.size
                        )),
                        Err(e) => log.warn(format!("Cache push failed: {}", e)),
                    },
                    Err(e) => log.warn(format!("Cache collection failed: {}", e)),
                }
            }
        }

        Ok(stored)
    }
}
