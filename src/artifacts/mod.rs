// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Artifact and cache storage
//!
//! Artifacts are files a successful job keeps for later jobs and
//! deployments. Caches are build outputs shared across runs under a key.
//! Both persist their bytes through a [`BlobStore`].

mod blob;
mod cache;
mod filesystem;
mod hash;
mod store;

pub use blob::{BlobStore, MemoryBlobStore};
pub use cache::{CacheEntry, CacheStats, CacheStore};
pub use filesystem::FilesystemBlobStore;
pub use hash::{cache_key, checksum, ContentHasher};
pub use store::ArtifactStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ArtifactId, JobId, PipelineId};

/// A stored job artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub pipeline_id: PipelineId,
    pub job_id: JobId,
    pub job_name: String,

    /// Path relative to the job workspace
    pub path: String,

    pub size: u64,

    /// BLAKE3 hex digest of the content
    pub checksum: String,

    pub created_at: DateTime<Utc>,

    /// When garbage collection may delete the artifact
    pub expire_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    /// Key of the artifact's blob
    pub(crate) fn blob_key(&self) -> String {
        format!("artifact-{}", self.id)
    }
}

/// Outcome of a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Expired artifacts deleted
    pub removed: usize,
    pub bytes_freed: u64,
    /// Expired artifacts kept because their pipeline is running
    pub kept_pinned: usize,
}
