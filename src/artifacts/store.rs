// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Artifact store
//!
//! Artifacts are indexed by producing job and path. Storing the same path
//! again for a job replaces the earlier artifact. Artifacts of a pipeline
//! that is pinned (running) survive garbage collection even when expired.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;

use super::blob::BlobStore;
use super::hash::checksum;
use super::{Artifact, GcReport};
use crate::errors::{PipewrightError, PipewrightResult};
use crate::executors::WorkspaceFile;
use crate::ids::{ArtifactId, JobId, PipelineId};

/// Index of artifacts over a blob store
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
    index: RwLock<BTreeMap<(JobId, String), Artifact>>,
    pinned: Mutex<HashSet<PipelineId>>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            index: RwLock::new(BTreeMap::new()),
            pinned: Mutex::new(HashSet::new()),
        }
    }

    fn pins(&self) -> MutexGuard<'_, HashSet<PipelineId>> {
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store one file produced by a job
    pub async fn store(
        &self,
        pipeline_id: PipelineId,
        job_id: JobId,
        job_name: &str,
        file: &WorkspaceFile,
        expire_in: Option<Duration>,
    ) -> PipewrightResult<Artifact> {
        let now = Utc::now();
        let expire_at = match expire_in {
            Some(d) => Some(
                now + chrono::Duration::from_std(d).map_err(|e| PipewrightError::Internal {
                    message: format!("artifact expiry out of range: {}", e),
                })?,
            ),
            None => None,
        };

        let artifact = Artifact {
            id: ArtifactId::new(),
            pipeline_id,
            job_id,
            job_name: job_name.to_string(),
            path: file.path.clone(),
            size: file.size(),
            checksum: checksum(&file.content),
            created_at: now,
            expire_at,
        };

        self.blobs
            .put(&artifact.blob_key(), file.content.clone())
            .await?;

        let previous = self
            .index
            .write()
            .await
            .insert((job_id, file.path.clone()), artifact.clone());
        if let Some(old) = previous {
            self.blobs.delete(&old.blob_key()).await?;
        }

        tracing::debug!(
            pipeline = %pipeline_id,
            job = %job_name,
            path = %artifact.path,
            size = artifact.size,
            "Artifact stored"
        );
        Ok(artifact)
    }

    pub async fn get(&self, job_id: JobId, path: &str) -> Option<Artifact> {
        self.index
            .read()
            .await
            .get(&(job_id, path.to_string()))
            .cloned()
    }

    /// Artifacts of one job, ordered by path
    pub async fn for_job(&self, job_id: JobId) -> Vec<Artifact> {
        self.index
            .read()
            .await
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect()
    }

    pub async fn for_pipeline(&self, pipeline_id: PipelineId) -> Vec<Artifact> {
        self.index
            .read()
            .await
            .values()
            .filter(|a| a.pipeline_id == pipeline_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    /// Content of an artifact, verified against its checksum
    pub async fn fetch(&self, job_id: JobId, path: &str) -> PipewrightResult<Vec<u8>> {
        let artifact = self
            .get(job_id, path)
            .await
            .ok_or_else(|| PipewrightError::ArtifactNotFound {
                job: job_id.to_string(),
                path: path.to_string(),
            })?;
        self.read(&artifact).await
    }

    async fn read(&self, artifact: &Artifact) -> PipewrightResult<Vec<u8>> {
        let data = self
            .blobs
            .get(&artifact.blob_key())
            .await?
            .ok_or_else(|| PipewrightError::ArtifactNotFound {
                job: artifact.job_name.clone(),
                path: artifact.path.clone(),
            })?;

        if checksum(&data) != artifact.checksum {
            return Err(PipewrightError::BlobStore {
                message: format!(
                    "checksum mismatch for artifact '{}' of job '{}'",
                    artifact.path, artifact.job_name
                ),
            });
        }
        Ok(data)
    }

    /// Materialize artifacts as workspace files
    pub async fn files(&self, artifacts: &[Artifact]) -> PipewrightResult<Vec<WorkspaceFile>> {
        let mut files = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            files.push(WorkspaceFile::new(
                artifact.path.clone(),
                self.read(artifact).await?,
            ));
        }
        Ok(files)
    }

    /// Protect a pipeline's artifacts from garbage collection
    pub fn pin(&self, pipeline_id: PipelineId) {
        self.pins().insert(pipeline_id);
    }

    pub fn unpin(&self, pipeline_id: PipelineId) {
        self.pins().remove(&pipeline_id);
    }

    pub fn is_pinned(&self, pipeline_id: PipelineId) -> bool {
        self.pins().contains(&pipeline_id)
    }

    /// Delete expired artifacts of pipelines that are not pinned
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> PipewrightResult<GcReport> {
        let pinned = self.pins().clone();
        let mut report = GcReport::default();

        let expired: Vec<Artifact> = {
            let mut index = self.index.write().await;
            let keys: Vec<(JobId, String)> = index
                .iter()
                .filter(|(_, a)| a.is_expired(now))
                .filter(|(_, a)| {
                    if pinned.contains(&a.pipeline_id) {
                        report.kept_pinned += 1;
                        false
                    } else {
                        true
                    }
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| index.remove(k)).collect()
        };

        for artifact in &expired {
            self.blobs.delete(&artifact.blob_key()).await?;
            report.removed += 1;
            report.bytes_freed += artifact.size;
        }

        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                bytes = report.bytes_freed,
                kept = report.kept_pinned,
                "Expired artifacts collected"
            );
        }
        Ok(report)
    }
}
