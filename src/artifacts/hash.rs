// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Content hashing for checksums and cache keys
//!
//! Uses BLAKE3 for fast, secure content hashing.

use blake3::Hasher;

/// Incremental content hasher
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Hash a string followed by a separator, so `["ab", "c"]` and
    /// `["a", "bc"]` differ
    pub fn update_field(&mut self, field: &str) {
        self.hasher.update(field.as_bytes());
        self.hasher.update(&[0]);
    }

    /// Finalize and get the hex digest
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a blob
pub fn checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Cache key of a job's cache
///
/// An explicit key is used verbatim so jobs can share a cache. Without one
/// the key is derived from the job name and the sorted cache paths.
pub fn cache_key(job: &str, paths: &[String], explicit: Option<&str>) -> String {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return key.to_string();
    }

    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = ContentHasher::new();
    hasher.update_field(job);
    for path in sorted {
        hasher.update_field(path);
    }
    hasher.finalize()
}
