// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Filesystem blob store
//!
//! Each blob is one file. Files are sharded into directories named after
//! the first two hex characters of the key's hash.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::blob::BlobStore;
use super::hash::checksum;
use crate::errors::PipewrightError;

/// Blob store rooted at a directory
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Open (and create if needed) a store at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PipewrightError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| PipewrightError::BlobStore {
            message: format!("Failed to create blob directory {}: {}", root.display(), e),
        })?;
        Ok(Self { root })
    }

    /// Store under the user's data directory
    pub fn default_store() -> Result<Self, PipewrightError> {
        let dirs = directories::ProjectDirs::from("", "", "pipewright").ok_or_else(|| {
            PipewrightError::BlobStore {
                message: "Could not determine a data directory".into(),
            }
        })?;
        Self::new(dirs.data_dir().join("blobs"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, PipewrightError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PipewrightError::BlobStore {
                message: format!("Invalid blob key '{}'", key),
            });
        }

        let hash = checksum(key.as_bytes());
        Ok(self.root.join(&hash[..2]).join(key))
    }
}

fn blob_error(action: &str, path: &Path, e: std::io::Error) -> PipewrightError {
    PipewrightError::BlobStore {
        message: format!("Failed to {} {}: {}", action, path.display(), e),
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), PipewrightError> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| blob_error("create", parent, e))?;
        }

        // Write then rename so readers never see a partial blob
        let tmp = PathBuf::from(format!("{}.partial", path.display()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| blob_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| blob_error("rename", &path, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipewrightError> {
        let path = self.blob_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(blob_error("read", &path, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, PipewrightError> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(blob_error("remove", &path, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, PipewrightError> {
        let mut keys = Vec::new();

        let mut shards = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| blob_error("list", &self.root, e))?;
        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| blob_error("list", &self.root, e))?
        {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }

            let mut entries = tokio::fs::read_dir(&shard_path)
                .await
                .map_err(|e| blob_error("list", &shard_path, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| blob_error("list", &shard_path, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(".partial") {
                    keys.push(name);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
