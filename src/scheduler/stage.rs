// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Stage scheduler
//!
//! Starts every eligible job of a stage as soon as a runner is free and
//! re-scans pending jobs after each completion, runner release or poll tick.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::job::{JobContext, JobExecutor, JobReport, JobStart};
use crate::errors::{PipewrightError, PipewrightResult};
use crate::ids::JobId;
use crate::pipeline::{
    JobGraph, JobReason, JobSpec, JobStatus, LogEntry, LogLevel, Pipeline, StageStatus, When,
};

/// What to do with a pending job
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Some need is not terminal yet
    Wait,
    Run,
    Skip(JobReason),
}

/// Decide a pending job from the state of its needs
pub(crate) fn decide(pipeline: &Pipeline, spec: &JobSpec) -> Decision {
    let mut failed = None;
    for need in &spec.needs {
        let Some(dep) = pipeline.job(need) else {
            return Decision::Skip(JobReason::DependencySkipped {
                dependency: need.clone(),
            });
        };
        match dep.status {
            JobStatus::Pending | JobStatus::Running => return Decision::Wait,
            JobStatus::Skipped | JobStatus::Canceled => {
                return Decision::Skip(JobReason::DependencySkipped {
                    dependency: need.clone(),
                })
            }
            JobStatus::Failed if !dep.allow_failure => {
                failed.get_or_insert_with(|| need.clone());
            }
            JobStatus::Failed | JobStatus::Success => {}
        }
    }

    match (spec.when, failed) {
        (When::Manual, _) => Decision::Skip(JobReason::ManualActionRequired),
        (When::Always, _) => Decision::Run,
        (When::OnSuccess, None) => Decision::Run,
        (When::OnSuccess, Some(dependency)) => {
            Decision::Skip(JobReason::DependencyFailed { dependency })
        }
        (When::OnFailure, Some(_)) => Decision::Run,
        (When::OnFailure, None) | (When::Never, _) => Decision::Skip(JobReason::WhenConditionNotMet),
    }
}

/// Runs the jobs of one stage
pub struct StageScheduler {
    executor: Arc<JobExecutor>,
    poll_interval: Duration,
}

impl StageScheduler {
    pub fn new(executor: Arc<JobExecutor>, poll_interval: Duration) -> Self {
        Self {
            executor,
            poll_interval,
        }
    }

    /// Run stage `index` of `pipeline` until every job is terminal
    ///
    /// Firing `cancel` cancels pending jobs and signals running ones; the
    /// call returns once they have all stopped.
    pub async fn run_stage(
        &self,
        pipeline: &Arc<RwLock<Pipeline>>,
        index: usize,
        cancel: &CancellationToken,
    ) -> PipewrightResult<StageStatus> {
        let (pipeline_id, stage_name, mut pending) = {
            let mut p = pipeline.write().await;
            let graph = JobGraph::build(&p.plan, index)?;
            let (roots, waiting) = graph.partition();
            let stage = p.stages.get_mut(index).ok_or_else(|| PipewrightError::Internal {
                message: format!("stage index {} out of range", index),
            })?;
            stage.status = StageStatus::Running;
            stage.started_at = Some(Utc::now());

            tracing::info!(
                pipeline = %p.id,
                stage = %graph.stage(),
                ready = roots.len(),
                waiting = waiting.len(),
                "Stage started"
            );

            let pending: Vec<String> = roots.into_iter().chain(waiting).collect();
            (p.id, graph.stage().to_string(), pending)
        };

        let mut running: JoinSet<JobReport> = JoinSet::new();
        let mut canceled = false;

        loop {
            let released = self.executor.pool().released();

            if !canceled && cancel.is_cancelled() {
                canceled = true;
                let mut p = pipeline.write().await;
                for name in pending.drain(..) {
                    if let Some(job) = p.job_mut(&name) {
                        job.settle(JobStatus::Canceled, JobReason::Canceled);
                    }
                }
                tracing::info!(pipeline = %pipeline_id, stage = %stage_name, "Stage canceling");
            }

            if !canceled {
                if let Err(e) = self.schedule(pipeline, &mut pending, &mut running, cancel).await {
                    running.shutdown().await;
                    fail_stage(&mut *pipeline.write().await, index, &e.to_string());
                    tracing::error!(pipeline = %pipeline_id, stage = %stage_name, error = %e, "Scheduling failed");
                    return Err(e);
                }
            }

            if pending.is_empty() && running.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => match joined {
                    Ok(report) => apply(&mut *pipeline.write().await, report),
                    Err(e) => {
                        running.shutdown().await;
                        let message = format!("job task failed: {}", e);
                        fail_stage(&mut *pipeline.write().await, index, &message);
                        tracing::error!(pipeline = %pipeline_id, stage = %stage_name, error = %e, "Job task failed");
                        return Err(PipewrightError::Internal { message });
                    }
                },
                _ = released => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled(), if !canceled => {}
            }
        }

        let mut p = pipeline.write().await;
        let stage = p.stages.get_mut(index).ok_or_else(|| PipewrightError::Internal {
            message: format!("stage index {} out of range", index),
        })?;

        let status = if canceled {
            StageStatus::Canceled
        } else {
            stage.derive_status()
        };
        stage.reason = match status {
            StageStatus::Failed => stage.jobs.iter().find(|j| j.fails_stage()).map(|j| {
                match &j.reason {
                    Some(reason) => format!("job '{}' failed: {}", j.name, reason),
                    None => format!("job '{}' failed", j.name),
                }
            }),
            StageStatus::Canceled => Some("canceled".to_string()),
            _ => None,
        };
        stage.status = status;
        stage.finished_at = Some(Utc::now());

        tracing::info!(pipeline = %pipeline_id, stage = %stage_name, %status, "Stage finished");
        Ok(status)
    }

    /// Decide and start pending jobs until a pass changes nothing
    async fn schedule(
        &self,
        pipeline: &Arc<RwLock<Pipeline>>,
        pending: &mut Vec<String>,
        running: &mut JoinSet<JobReport>,
        cancel: &CancellationToken,
    ) -> PipewrightResult<()> {
        let mut p = pipeline.write().await;
        let pool = self.executor.pool();

        loop {
            let mut settled = false;
            let mut still = Vec::with_capacity(pending.len());

            for name in pending.drain(..) {
                let (Some(spec), Some(job_id)) =
                    (p.job_spec(&name).cloned(), p.job(&name).map(|j| j.id))
                else {
                    return Err(PipewrightError::Internal {
                        message: format!("job '{}' has no record in pipeline {}", name, p.id),
                    });
                };

                match decide(&p, &spec) {
                    Decision::Wait => still.push(name),
                    Decision::Skip(reason) => {
                        if let Some(job) = p.job_mut(&name) {
                            tracing::info!(job = %name, %reason, "Job skipped");
                            job.settle(JobStatus::Skipped, reason);
                        }
                        settled = true;
                    }
                    Decision::Run if !pool.has_capable_runner(&spec.tags) => {
                        if let Some(job) = p.job_mut(&name) {
                            let reason = JobReason::NoMatchingRunner {
                                tags: spec.tags.clone(),
                            };
                            tracing::warn!(job = %name, %reason, "Job cannot be scheduled");
                            job.settle(JobStatus::Failed, reason);
                        }
                        settled = true;
                    }
                    Decision::Run => {
                        let ctx = context(&p, job_id, spec, cancel);
                        match self.executor.try_start(ctx) {
                            JobStart::Deferred(_) => still.push(name),
                            JobStart::Started(job) => {
                                if let Some(record) = p.job_mut(&name) {
                                    record.status = JobStatus::Running;
                                    record.started_at = Some(job.started_at());
                                    record.runner_id = Some(job.runner_id().clone());
                                    record.log.push(LogEntry {
                                        timestamp: Utc::now(),
                                        level: LogLevel::Info,
                                        message: format!(
                                            "Job pending -> running on runner {}",
                                            job.runner_id()
                                        ),
                                    });
                                }
                                running.spawn(job.execute());
                            }
                        }
                    }
                }
            }

            *pending = still;
            if !settled {
                return Ok(());
            }
        }
    }
}

/// Fail every unfinished job of stage `index` and the stage itself
fn fail_stage(pipeline: &mut Pipeline, index: usize, message: &str) {
    let Some(stage) = pipeline.stages.get_mut(index) else {
        return;
    };
    for job in stage.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
        job.settle(JobStatus::Failed, JobReason::SystemFailure {
            message: message.to_string(),
        });
    }
    stage.status = StageStatus::Failed;
    stage.reason = Some(message.to_string());
    stage.finished_at = Some(Utc::now());
}

/// Build the execution context of a job from the pipeline's state
fn context(
    pipeline: &Pipeline,
    job_id: JobId,
    spec: JobSpec,
    cancel: &CancellationToken,
) -> JobContext {
    let protected = pipeline.trigger.protected_ref;
    let mut env = pipeline.variables.visible(protected);
    env.extend(spec.variables.visible(protected));

    env.insert("CI".into(), "true".into());
    env.insert("CI_PIPELINE_ID".into(), pipeline.id.to_string());
    env.insert("CI_PIPELINE_SOURCE".into(), pipeline.trigger.kind.to_string());
    env.insert("CI_COMMIT_REF_NAME".into(), pipeline.trigger.git_ref.clone());
    env.insert("CI_COMMIT_SHA".into(), pipeline.trigger.commit.clone());
    env.insert("CI_JOB_ID".into(), job_id.to_string());
    env.insert("CI_JOB_NAME".into(), spec.name.clone());
    env.insert("CI_JOB_STAGE".into(), spec.stage.clone());
    if let Some(image) = &spec.image {
        env.insert("CI_JOB_IMAGE".into(), image.clone());
    }

    let mut masked = pipeline.variables.masked_values();
    masked.extend(spec.variables.masked_values());

    let dependency_artifacts = spec
        .needs
        .iter()
        .filter_map(|need| pipeline.job(need))
        .filter(|dep| dep.status == JobStatus::Success)
        .flat_map(|dep| dep.artifacts.iter().cloned())
        .collect();

    JobContext {
        pipeline_id: pipeline.id,
        job_id,
        spec,
        env,
        masked,
        dependency_artifacts,
        cancel: cancel.clone(),
    }
}

/// Record a finished job's report on its job
fn apply(pipeline: &mut Pipeline, report: JobReport) {
    let Some(job) = pipeline.job_mut(&report.name) else {
        return;
    };
    job.status = report.status;
    job.reason = report.reason;
    job.attempts = report.attempts;
    job.runner_id = report.runner_id;
    job.started_at = Some(report.started_at);
    job.finished_at = Some(report.finished_at);
    job.artifacts = report.artifacts;
    job.log.extend(report.log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineDefinition, PipelineValidator, Trigger};

    fn pipeline(yaml: &str) -> Pipeline {
        let def = PipelineDefinition::from_yaml(yaml).unwrap();
        let spec = Arc::new(PipelineValidator::compile(&def).unwrap());
        Pipeline::instantiate(spec, Trigger::push("main", "abc123")).unwrap()
    }

    const POLICIES: &str = r#"
name: policies
stages: [build, test]
build:
  stage: build
  script: [make]
lint:
  stage: build
  script: [lint]
  allow_failure: true
unit:
  stage: test
  script: [test]
  needs: [build]
notify:
  stage: test
  script: [notify]
  needs: [build]
  when: on_failure
report:
  stage: test
  script: [report]
  needs: [build]
  when: always
approve:
  stage: test
  script: [approve]
  when: manual
lenient:
  stage: test
  script: [check]
  needs: [lint]
"#;

    fn set(p: &mut Pipeline, job: &str, status: JobStatus) {
        p.job_mut(job).unwrap().status = status;
    }

    fn decision(p: &Pipeline, job: &str) -> Decision {
        decide(p, p.job_spec(job).unwrap())
    }

    #[test]
    fn test_waits_for_unfinished_needs() {
        let mut p = pipeline(POLICIES);
        assert_eq!(decision(&p, "unit"), Decision::Wait);
        set(&mut p, "build", JobStatus::Running);
        assert_eq!(decision(&p, "unit"), Decision::Wait);
        assert_eq!(decision(&p, "build"), Decision::Run);
    }

    #[test]
    fn test_policies_after_success() {
        let mut p = pipeline(POLICIES);
        set(&mut p, "build", JobStatus::Success);

        assert_eq!(decision(&p, "unit"), Decision::Run);
        assert_eq!(decision(&p, "report"), Decision::Run);
        assert_eq!(
            decision(&p, "notify"),
            Decision::Skip(JobReason::WhenConditionNotMet)
        );
        assert_eq!(
            decision(&p, "approve"),
            Decision::Skip(JobReason::ManualActionRequired)
        );
    }

    #[test]
    fn test_policies_after_failure() {
        let mut p = pipeline(POLICIES);
        set(&mut p, "build", JobStatus::Failed);

        assert_eq!(
            decision(&p, "unit"),
            Decision::Skip(JobReason::DependencyFailed {
                dependency: "build".into()
            })
        );
        assert_eq!(decision(&p, "notify"), Decision::Run);
        assert_eq!(decision(&p, "report"), Decision::Run);
    }

    #[test]
    fn test_allowed_failure_does_not_block() {
        let mut p = pipeline(POLICIES);
        set(&mut p, "lint", JobStatus::Failed);
        assert_eq!(decision(&p, "lenient"), Decision::Run);
    }

    #[test]
    fn test_skipped_need_skips_dependent() {
        let mut p = pipeline(POLICIES);
        set(&mut p, "build", JobStatus::Skipped);
        for job in ["unit", "report"] {
            assert_eq!(
                decision(&p, job),
                Decision::Skip(JobReason::DependencySkipped {
                    dependency: "build".into()
                })
            );
        }
    }

    #[test]
    fn test_context_variables() {
        let mut p = pipeline(
            r#"
name: ctx
stages: [build, test]
variables:
  TOKEN:
    value: s3cr3t
    masked: true
  REGION: eu
build:
  stage: build
  script: [make]
  image: rust:1.80
test:
  stage: test
  script: [test]
  needs: [build]
  variables:
    REGION: us
"#,
        );
        set(&mut p, "build", JobStatus::Success);
        let spec = p.job_spec("test").unwrap().clone();
        let job_id = p.job("test").unwrap().id;
        let ctx = context(&p, job_id, spec, &CancellationToken::new());

        assert_eq!(ctx.env["REGION"], "us");
        assert_eq!(ctx.env["CI_COMMIT_REF_NAME"], "main");
        assert_eq!(ctx.env["CI_COMMIT_SHA"], "abc123");
        assert_eq!(ctx.env["CI_JOB_STAGE"], "test");
        assert_eq!(ctx.env["CI_PIPELINE_SOURCE"], "push");
        assert!(!ctx.env.contains_key("CI_JOB_IMAGE"));
        assert_eq!(ctx.masked, vec!["s3cr3t".to_string()]);
        assert_eq!(ctx.job_id, p.job("test").unwrap().id);
    }

    #[tokio::test]
    async fn test_missing_job_record_is_an_internal_error() {
        use crate::artifacts::{ArtifactStore, CacheStore, MemoryBlobStore};
        use crate::executors::ScriptedBackend;
        use crate::runners::RunnerPool;
        use crate::scheduler::ExecutorSettings;

        let pool = Arc::new(RunnerPool::new());
        pool.register("r0", "r0", vec![]).unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let executor = JobExecutor::new(
            pool,
            backend.clone(),
            Arc::new(ArtifactStore::new(blobs.clone())),
            Arc::new(CacheStore::new(blobs)),
            ExecutorSettings::default(),
        );
        let scheduler = StageScheduler::new(Arc::new(executor), Duration::from_millis(5));

        let mut p = pipeline(
            r#"
name: orphan
stages: [build]
ghost:
  stage: build
  script: [boo]
"#,
        );
        p.stages[0].jobs.retain(|j| j.name != "ghost");
        let pipeline = Arc::new(RwLock::new(p));

        let result = scheduler
            .run_stage(&pipeline, 0, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipewrightError::Internal { .. })));
        assert!(backend.commands_for("ghost").is_empty());
        assert_eq!(pipeline.read().await.stages[0].status, StageStatus::Failed);
    }
}
