// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

use std::sync::Arc;

use super::Engine;
use crate::artifacts::{ArtifactStore, BlobStore, CacheStore, FilesystemBlobStore, MemoryBlobStore};
use crate::config::EngineConfig;
use crate::deploy::{DeploymentManager, DeploymentTarget, RecordingTarget};
use crate::errors::PipewrightResult;
use crate::executors::{ExecutionBackend, ShellBackend};
use crate::runners::RunnerPool;
use crate::scheduler::{ExecutorSettings, JobExecutor, StageScheduler};

/// Assembles an [`Engine`] from configuration and pluggable parts
///
/// Parts left unset fall back to the configuration: a shell backend, a
/// filesystem blob store when `blob_dir` is set (memory otherwise) and a
/// deployment target that only records what it was asked to apply.
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn ExecutionBackend>>,
    blobs: Option<Arc<dyn BlobStore>>,
    target: Option<Arc<dyn DeploymentTarget>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            blobs: None,
            target: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn deployment_target(mut self, target: Arc<dyn DeploymentTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn build(self) -> PipewrightResult<Engine> {
        let config = self.config;

        let backend: Arc<dyn ExecutionBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(ShellBackend::new(&config.shell, config.builds_dir.clone())?),
        };
        let blobs: Arc<dyn BlobStore> = match (self.blobs, &config.blob_dir) {
            (Some(blobs), _) => blobs,
            (None, Some(dir)) => Arc::new(FilesystemBlobStore::new(dir.clone())?),
            (None, None) => Arc::new(MemoryBlobStore::new()),
        };
        let target = self
            .target
            .unwrap_or_else(|| Arc::new(RecordingTarget::new()));

        let pool = Arc::new(RunnerPool::new());
        for runner in &config.runners {
            let name = runner.name.clone().unwrap_or_else(|| runner.id.clone());
            pool.register(runner.id.clone(), name, runner.tags.clone())?;
        }

        let deployments = DeploymentManager::new(target);
        for env in &config.environments {
            deployments.add_environment(env.name.clone(), env.protected);
        }

        let artifacts = Arc::new(ArtifactStore::new(Arc::clone(&blobs)));
        let cache = Arc::new(CacheStore::new(blobs));
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&pool),
            backend,
            Arc::clone(&artifacts),
            Arc::clone(&cache),
            ExecutorSettings {
                default_timeout: config.default_timeout(),
                artifact_expire_in: config.artifact_expire_in(),
            },
        ));
        let scheduler = StageScheduler::new(executor, config.runner_poll_interval());

        tracing::debug!(
            runners = pool.len(),
            environments = config.environments.len(),
            "Engine built"
        );

        Ok(Engine::assemble(
            config,
            pool,
            scheduler,
            artifacts,
            cache,
            deployments,
        ))
    }
}
