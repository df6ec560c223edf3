// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Deployment targets
//!
//! A target is whatever actually rolls artifacts out. The manager only
//! drives the deployment state machine around it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::Deployment;
use crate::ids::DeploymentId;

/// Result of applying a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Succeeded,
    Failed(String),
    Canceled(String),
}

/// Something a deployment can be applied to
#[async_trait]
pub trait DeploymentTarget: Send + Sync {
    async fn apply(&self, deployment: &Deployment) -> DeployOutcome;
}

/// Target that records deployments and succeeds unless told otherwise
#[derive(Debug, Default)]
pub struct RecordingTarget {
    applied: Mutex<Vec<DeploymentId>>,
    fail_next: AtomicUsize,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deployments
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Deployments applied so far, in order
    pub fn applied(&self) -> Vec<DeploymentId> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeploymentTarget for RecordingTarget {
    async fn apply(&self, deployment: &Deployment) -> DeployOutcome {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(deployment.id);

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        tracing::info!(
            deployment = %deployment.id,
            environment = %deployment.environment,
            strategy = %deployment.strategy,
            artifacts = deployment.artifacts.len(),
            "Applying deployment"
        );

        if should_fail {
            DeployOutcome::Failed("target rejected the deployment".into())
        } else {
            DeployOutcome::Succeeded
        }
    }
}
