// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Pipeline engine
//!
//! Owns every pipeline run by id and drives runs stage by stage. Runs are
//! independent: several may execute at once and share the runner pool.

mod builder;

pub use builder::EngineBuilder;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{ArtifactStore, CacheStore, GcReport};
use crate::config::EngineConfig;
use crate::deploy::{Deployment, DeploymentManager, DeploymentStrategy};
use crate::errors::{PipewrightError, PipewrightResult};
use crate::ids::{DeploymentId, PipelineId};
use crate::pipeline::{
    JobReason, JobStatus, LogEntry, Pipeline, PipelineDefinition, PipelineSpec, PipelineStatus,
    PipelineValidator, RunResult, StageStatus, Trigger, TriggerKind,
};
use crate::runners::RunnerPool;
use crate::scheduler::StageScheduler;

/// Why a run stopped before its last stage
enum Halt {
    /// Stage `index` failed
    Failed { index: usize },
    /// Canceled; stages from `from` on never started
    Canceled { from: usize },
}

/// Pipeline orchestrator
pub struct Engine {
    config: EngineConfig,
    pool: Arc<RunnerPool>,
    scheduler: StageScheduler,
    artifacts: Arc<ArtifactStore>,
    cache: Arc<CacheStore>,
    deployments: DeploymentManager,
    pipelines: RwLock<HashMap<PipelineId, Arc<RwLock<Pipeline>>>>,
    cancellations: Mutex<HashMap<PipelineId, CancellationToken>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    fn assemble(
        config: EngineConfig,
        pool: Arc<RunnerPool>,
        scheduler: StageScheduler,
        artifacts: Arc<ArtifactStore>,
        cache: Arc<CacheStore>,
        deployments: DeploymentManager,
    ) -> Self {
        Self {
            config,
            pool,
            scheduler,
            artifacts,
            cache,
            deployments,
            pipelines: RwLock::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<RunnerPool> {
        &self.pool
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn deployments(&self) -> &DeploymentManager {
        &self.deployments
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<PipelineId, CancellationToken>> {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle(&self, id: PipelineId) -> PipewrightResult<Arc<RwLock<Pipeline>>> {
        self.pipelines
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipewrightError::pipeline_not_found(id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a pending run of `spec` for `trigger`
    pub async fn create_pipeline(
        &self,
        spec: Arc<PipelineSpec>,
        trigger: Trigger,
    ) -> PipewrightResult<PipelineId> {
        let pipeline = Pipeline::instantiate(spec, trigger)?;
        Ok(self.insert(pipeline).await)
    }

    /// Compile `definition` and create a pending run of it
    pub async fn submit(
        &self,
        definition: &PipelineDefinition,
        trigger: Trigger,
    ) -> PipewrightResult<PipelineId> {
        let spec = PipelineValidator::compile(definition)?;
        self.create_pipeline(Arc::new(spec), trigger).await
    }

    async fn insert(&self, pipeline: Pipeline) -> PipelineId {
        let id = pipeline.id;
        tracing::info!(
            pipeline = %id,
            name = %pipeline.name,
            git_ref = %pipeline.trigger.git_ref,
            trigger = %pipeline.trigger.kind,
            jobs = pipeline.jobs().count(),
            "Pipeline created"
        );
        self.tokens().insert(id, CancellationToken::new());
        self.pipelines
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(pipeline)));
        id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Running
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a pending pipeline to completion
    pub async fn run(&self, id: PipelineId) -> PipewrightResult<RunResult> {
        let pipeline = self.handle(id).await?;

        let (stage_count, cancel) = {
            let mut p = pipeline.write().await;
            if p.status != PipelineStatus::Pending {
                return Err(PipewrightError::InvalidTransition {
                    id: id.to_string(),
                    status: p.status.to_string(),
                    action: "run".into(),
                });
            }
            let cancel = self.tokens().entry(id).or_default().clone();
            p.status = PipelineStatus::Running;
            p.started_at = Some(Utc::now());
            tracing::info!(pipeline = %id, name = %p.name, stages = p.stages.len(), "Pipeline started");
            (p.stages.len(), cancel)
        };
        self.artifacts.pin(id);

        let mut halt = None;
        let mut error = None;
        for index in 0..stage_count {
            if cancel.is_cancelled() {
                halt = Some(Halt::Canceled { from: index });
                break;
            }
            match self.scheduler.run_stage(&pipeline, index, &cancel).await {
                Ok(StageStatus::Failed) => {
                    halt = Some(Halt::Failed { index });
                    break;
                }
                Ok(StageStatus::Canceled) => {
                    halt = Some(Halt::Canceled { from: index + 1 });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    halt = Some(Halt::Failed { index });
                    error = Some(e);
                    break;
                }
            }
        }

        let result = {
            let mut p = pipeline.write().await;
            match halt {
                None => {
                    p.status = PipelineStatus::Success;
                }
                Some(Halt::Canceled { from }) => {
                    cancel_stages(&mut p, from);
                    p.status = PipelineStatus::Canceled;
                    p.reason = Some("canceled".into());
                }
                Some(Halt::Failed { index }) => {
                    let stage = p.stages[index].name.clone();
                    skip_stages(&mut p, index + 1, &stage);
                    p.status = PipelineStatus::Failed;
                    p.reason = Some(match &error {
                        Some(e) => format!("stage '{}' failed: {}", stage, e),
                        None => format!("stage '{}' failed", stage),
                    });
                }
            }
            let artifacts = p.jobs().flat_map(|j| j.artifacts.iter().cloned()).collect();
            p.artifacts = artifacts;
            p.finished_at = Some(Utc::now());

            tracing::info!(
                pipeline = %id,
                status = %p.status,
                reason = p.reason.as_deref().unwrap_or_default(),
                artifacts = p.artifacts.len(),
                "Pipeline finished"
            );
            p.result()
        };

        self.artifacts.unpin(id);
        self.tokens().remove(&id);

        match error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Run a pending pipeline on its own task
    pub fn spawn(self: &Arc<Self>, id: PipelineId) -> JoinHandle<PipewrightResult<RunResult>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(id).await })
    }

    /// Cancel a pending or running pipeline
    ///
    /// A pending pipeline is canceled at once. A running one is signalled;
    /// its run settles every job and returns.
    pub async fn cancel(&self, id: PipelineId) -> PipewrightResult<()> {
        let pipeline = self.handle(id).await?;
        let mut p = pipeline.write().await;
        match p.status {
            PipelineStatus::Pending => {
                cancel_stages(&mut p, 0);
                p.status = PipelineStatus::Canceled;
                p.reason = Some("canceled before start".into());
                p.finished_at = Some(Utc::now());
                self.tokens().remove(&id);
                tracing::info!(pipeline = %id, "Pending pipeline canceled");
                Ok(())
            }
            PipelineStatus::Running => {
                if let Some(token) = self.tokens().get(&id) {
                    token.cancel();
                }
                tracing::info!(pipeline = %id, "Pipeline cancellation requested");
                Ok(())
            }
            status => Err(PipewrightError::InvalidTransition {
                id: id.to_string(),
                status: status.to_string(),
                action: "cancel".into(),
            }),
        }
    }

    /// Create a fresh pending run of a finished pipeline's definitions
    pub async fn retry(&self, id: PipelineId) -> PipewrightResult<PipelineId> {
        let (spec, trigger) = {
            let pipeline = self.handle(id).await?;
            let p = pipeline.read().await;
            if !p.status.is_terminal() {
                return Err(PipewrightError::InvalidTransition {
                    id: id.to_string(),
                    status: p.status.to_string(),
                    action: "retry".into(),
                });
            }
            let mut trigger = p.trigger.clone();
            trigger.kind = TriggerKind::Retry;
            (Arc::clone(&p.spec), trigger)
        };

        let mut retried = Pipeline::instantiate(spec, trigger)?;
        retried.retried_from = Some(id);
        tracing::info!(pipeline = %retried.id, retried_from = %id, "Pipeline retried");
        Ok(self.insert(retried).await)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of a pipeline
    pub async fn pipeline(&self, id: PipelineId) -> PipewrightResult<Pipeline> {
        let pipeline = self.handle(id).await?;
        let snapshot = pipeline.read().await.clone();
        Ok(snapshot)
    }

    pub async fn result(&self, id: PipelineId) -> PipewrightResult<RunResult> {
        let pipeline = self.handle(id).await?;
        let result = pipeline.read().await.result();
        Ok(result)
    }

    /// Snapshots of every pipeline, oldest first
    pub async fn history(&self) -> Vec<Pipeline> {
        let handles: Vec<_> = self.pipelines.read().await.values().cloned().collect();
        let mut pipelines = Vec::with_capacity(handles.len());
        for handle in handles {
            pipelines.push(handle.read().await.clone());
        }
        pipelines.sort_by_key(|p| p.created_at);
        pipelines
    }

    pub async fn job_log(&self, id: PipelineId, job: &str) -> PipewrightResult<Vec<LogEntry>> {
        let pipeline = self.handle(id).await?;
        let p = pipeline.read().await;
        p.job(job)
            .map(|j| j.log.clone())
            .ok_or_else(|| PipewrightError::JobNotFound {
                pipeline: id.to_string(),
                job: job.to_string(),
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deployments and housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Deploy a finished pipeline's artifacts
    pub async fn deploy(
        &self,
        id: PipelineId,
        environment: &str,
        strategy: DeploymentStrategy,
    ) -> PipewrightResult<Deployment> {
        let pipeline = self.pipeline(id).await?;
        self.deployments.deploy(&pipeline, environment, strategy).await
    }

    pub async fn rollback(&self, deployment: DeploymentId) -> PipewrightResult<Deployment> {
        self.deployments.rollback(deployment).await
    }

    /// Delete expired artifacts of pipelines that are not running
    pub async fn collect_garbage(&self) -> PipewrightResult<GcReport> {
        self.artifacts.collect_garbage(Utc::now()).await
    }
}

/// Cancel every unfinished job of stages `from..`
fn cancel_stages(pipeline: &mut Pipeline, from: usize) {
    for stage in pipeline.stages.iter_mut().skip(from) {
        for job in stage.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
            job.settle(JobStatus::Canceled, JobReason::Canceled);
        }
        stage.status = StageStatus::Canceled;
        stage.reason = Some("canceled".into());
    }
}

/// Skip the jobs of stages `from..` after `failed_stage` failed
///
/// A job needing a job whose outcome fails its stage is skipped with
/// `DependencyFailed`, which fails its own stage in turn.
fn skip_stages(pipeline: &mut Pipeline, from: usize, failed_stage: &str) {
    for index in from..pipeline.stages.len() {
        let reasons: Vec<(String, JobReason)> = pipeline.stages[index]
            .jobs
            .iter()
            .map(|job| {
                let failed_need = pipeline
                    .job_spec(&job.name)
                    .into_iter()
                    .flat_map(|spec| spec.needs.iter())
                    .find(|need| pipeline.job(need).is_some_and(|dep| dep.fails_stage()));
                let reason = match failed_need {
                    Some(need) => JobReason::DependencyFailed {
                        dependency: need.clone(),
                    },
                    None => JobReason::UpstreamStageFailed {
                        stage: failed_stage.to_string(),
                    },
                };
                (job.name.clone(), reason)
            })
            .collect();

        let stage = &mut pipeline.stages[index];
        for (name, reason) in reasons {
            if let Some(job) = stage.job_mut(&name) {
                job.settle(JobStatus::Skipped, reason);
            }
        }

        match stage.jobs.iter().find(|j| j.fails_stage()) {
            Some(job) => {
                stage.status = StageStatus::Failed;
                stage.reason = job
                    .reason
                    .as_ref()
                    .map(|r| format!("job '{}' skipped: {}", job.name, r));
            }
            None => {
                stage.status = StageStatus::Skipped;
                stage.reason = Some(format!("stage '{}' failed", failed_stage));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ScriptedBackend;

    const PIPELINE: &str = r#"
name: tokens
stages: [build]
build:
  stage: build
  script: [make]
"#;

    fn engine() -> Engine {
        let config = EngineConfig {
            runner_poll_interval_ms: 5,
            ..EngineConfig::default()
        }
        .with_local_runners(1);
        Engine::builder(config)
            .backend(Arc::new(ScriptedBackend::new()))
            .build()
            .unwrap()
    }

    async fn submit(engine: &Engine) -> PipelineId {
        let definition = PipelineDefinition::from_yaml(PIPELINE).unwrap();
        engine
            .submit(&definition, Trigger::push("main", "abc"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_run_leaves_no_token() {
        let engine = engine();
        let id = submit(&engine).await;
        engine.cancel(id).await.unwrap();
        assert!(engine.tokens().is_empty());

        for _ in 0..3 {
            assert!(matches!(
                engine.run(id).await,
                Err(PipewrightError::InvalidTransition { .. })
            ));
        }
        assert!(engine.tokens().is_empty());
    }

    #[tokio::test]
    async fn test_finished_run_drops_its_token() {
        let engine = engine();
        let id = submit(&engine).await;
        assert!(engine.tokens().contains_key(&id));

        engine.run(id).await.unwrap();
        assert!(engine.tokens().is_empty());
        assert!(engine.run(id).await.is_err());
        assert!(engine.tokens().is_empty());
    }
}
