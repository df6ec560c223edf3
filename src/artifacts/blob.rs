// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Blob persistence
//!
//! Artifacts and caches are persisted through an opaque [`BlobStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::PipewrightError;

/// Opaque key/bytes store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous value
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), PipewrightError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipewrightError>;

    /// Remove a blob; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, PipewrightError>;

    /// Every stored key
    async fn keys(&self) -> Result<Vec<String>, PipewrightError>;
}

/// Blob store held in memory
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), PipewrightError> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipewrightError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, PipewrightError> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, PipewrightError> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
