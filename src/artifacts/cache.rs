// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Build cache
//!
//! One entry per key, shared by every pipeline run. A push replaces the
//! entry wholesale; the last push wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::blob::BlobStore;
use super::hash::checksum;
use crate::errors::{PipewrightError, PipewrightResult};
use crate::executors::WorkspaceFile;
use crate::ids::JobId;

/// Metadata of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Number of cached files
    pub files: usize,
    /// Total size in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Job that pushed the current content
    pub pushed_by: Option<JobId>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest entry timestamp
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

/// Keyed build cache over a blob store
pub struct CacheStore {
    blobs: Arc<dyn BlobStore>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn blob_key(key: &str) -> String {
        format!("cache-{}", checksum(key.as_bytes()))
    }

    /// Latest content pushed under `key`, refreshing its last-used time
    pub async fn pull(&self, key: &str) -> PipewrightResult<Option<Vec<WorkspaceFile>>> {
        {
            let mut entries = self.entries.write().await;
            match entries.get_mut(key) {
                Some(entry) => entry.last_used = Utc::now(),
                None => return Ok(None),
            }
        }

        let Some(data) = self.blobs.get(&Self::blob_key(key)).await? else {
            return Ok(None);
        };
        let files: Vec<WorkspaceFile> =
            serde_json::from_slice(&data).map_err(|e| PipewrightError::CacheError {
                message: format!("Failed to decode cache entry '{}': {}", key, e),
            })?;

        tracing::debug!(key, files = files.len(), "Cache pulled");
        Ok(Some(files))
    }

    /// Replace the content under `key`
    pub async fn push(
        &self,
        key: &str,
        files: &[WorkspaceFile],
        pushed_by: Option<JobId>,
    ) -> PipewrightResult<CacheEntry> {
        let data = serde_json::to_vec(files).map_err(|e| PipewrightError::CacheError {
            message: format!("Failed to encode cache entry '{}': {}", key, e),
        })?;
        // Content and metadata change under one lock
        let mut entries = self.entries.write().await;
        self.blobs.put(&Self::blob_key(key), data).await?;

        let now = Utc::now();
        let created_at = entries.get(key).map(|e| e.created_at).unwrap_or(now);
        let entry = CacheEntry {
            key: key.to_string(),
            files: files.len(),
            size: files.iter().map(WorkspaceFile::size).sum(),
            created_at,
            last_used: now,
            pushed_by,
        };
        entries.insert(key.to_string(), entry.clone());

        tracing::debug!(key, files = entry.files, size = entry.size, "Cache pushed");
        Ok(entry)
    }

    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Drop entries not used since `cutoff`; returns how many were dropped
    pub async fn evict_unused_since(&self, cutoff: DateTime<Utc>) -> PipewrightResult<usize> {
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .values()
            .filter(|e| e.last_used < cutoff)
            .map(|e| e.key.clone())
            .collect();

        for key in &stale {
            self.blobs.delete(&Self::blob_key(key)).await?;
            entries.remove(key);
        }

        if !stale.is_empty() {
            tracing::info!(evicted = stale.len(), "Stale cache entries evicted");
        }
        Ok(stale.len())
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            size_bytes: entries.values().map(|e| e.size).sum(),
            oldest_entry: entries.values().map(|e| e.created_at).min(),
            newest_entry: entries.values().map(|e| e.created_at).max(),
        }
    }

    /// Remove every entry
    pub async fn clear(&self) -> PipewrightResult<()> {
        let mut entries = self.entries.write().await;
        let keys: Vec<String> = entries.keys().cloned().collect();
        for key in keys {
            self.blobs.delete(&Self::blob_key(&key)).await?;
            entries.remove(&key);
        }
        Ok(())
    }
}
