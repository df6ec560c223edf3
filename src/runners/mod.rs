// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Runners
//!
//! A runner is a scheduling slot that executes at most one job at a time.
//! Runners are registered once and claimed and released repeatedly through
//! the [`RunnerPool`].

mod pool;

pub use pool::{RunnerLease, RunnerPool};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, RunnerId};

/// A registered runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,

    /// Display name
    pub name: String,

    /// Capability tags a job can require
    pub tags: Vec<String>,

    pub status: RunnerStatus,

    /// Job currently holding the runner
    pub current_job: Option<JobId>,

    /// Jobs run over the runner's lifetime
    pub jobs_run: u64,

    pub registered_at: DateTime<Utc>,

    /// Last time the runner reported in
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Runner {
    pub fn new(id: RunnerId, name: impl Into<String>, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            tags,
            status: RunnerStatus::Online,
            current_job: None,
            jobs_run: 0,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    /// Whether the runner's tags cover every required tag
    pub fn supports(&self, required: &[String]) -> bool {
        required.iter().all(|tag| self.tags.contains(tag))
    }

    /// Whether the runner can take a job with `required` tags right now
    pub fn is_available_for(&self, required: &[String]) -> bool {
        self.status == RunnerStatus::Online && self.current_job.is_none() && self.supports(required)
    }

    pub fn is_busy(&self) -> bool {
        self.current_job.is_some()
    }
}

/// Status of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    /// Ready to accept jobs
    Online,

    /// Not reachable; keeps its current job until released
    Offline,

    /// Reachable but not accepting new jobs
    Paused,
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerStatus::Online => write!(f, "online"),
            RunnerStatus::Offline => write!(f, "offline"),
            RunnerStatus::Paused => write!(f, "paused"),
        }
    }
}
