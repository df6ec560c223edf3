// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Deployment manager
//!
//! Bookkeeping is held under one mutex that is never held while a target
//! applies a deployment.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::target::{DeployOutcome, DeploymentTarget};
use super::{Deployment, DeploymentStatus, DeploymentStrategy, Environment};
use crate::artifacts::Artifact;
use crate::errors::{PipewrightError, PipewrightResult};
use crate::ids::{DeploymentId, PipelineId};
use crate::pipeline::{Pipeline, PipelineStatus};

#[derive(Debug, Default)]
struct DeployState {
    environments: BTreeMap<String, Environment>,
    deployments: HashMap<DeploymentId, Deployment>,
}

/// Creates deployments and rollbacks and tracks environments
pub struct DeploymentManager {
    target: Arc<dyn DeploymentTarget>,
    state: Mutex<DeployState>,
    sequence: AtomicU64,
}

impl DeploymentManager {
    pub fn new(target: Arc<dyn DeploymentTarget>) -> Self {
        Self {
            target,
            state: Mutex::new(DeployState::default()),
            sequence: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeployState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare an environment; redeclaring updates its protection
    pub fn add_environment(&self, name: impl Into<String>, protected: bool) -> Environment {
        let name = name.into();
        let mut state = self.lock();
        let env = state
            .environments
            .entry(name.clone())
            .or_insert_with(|| Environment::new(name, protected));
        env.protected = protected;
        env.clone()
    }

    pub fn environment(&self, name: &str) -> PipewrightResult<Environment> {
        self.lock()
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| PipewrightError::EnvironmentNotFound {
                name: name.to_string(),
            })
    }

    pub fn environments(&self) -> Vec<Environment> {
        self.lock().environments.values().cloned().collect()
    }

    pub fn deployment(&self, id: DeploymentId) -> PipewrightResult<Deployment> {
        self.lock()
            .deployments
            .get(&id)
            .cloned()
            .ok_or_else(|| PipewrightError::DeploymentNotFound { id: id.to_string() })
    }

    /// Deployments of an environment, oldest first
    pub fn history(&self, environment: &str) -> Vec<Deployment> {
        let state = self.lock();
        let mut deployments: Vec<Deployment> = state
            .deployments
            .values()
            .filter(|d| d.environment == environment)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.sequence);
        deployments
    }

    /// Deploy a pipeline's artifacts to `environment`
    ///
    /// The pipeline must have finished with status Success. Undeclared
    /// environments are created unprotected.
    pub async fn deploy(
        &self,
        pipeline: &Pipeline,
        environment: &str,
        strategy: DeploymentStrategy,
    ) -> PipewrightResult<Deployment> {
        if pipeline.status != PipelineStatus::Success {
            return Err(PipewrightError::DeploymentPrecondition {
                pipeline: pipeline.id.to_string(),
                environment: environment.to_string(),
                status: pipeline.status.to_string(),
            });
        }

        let deployment = {
            let mut state = self.lock();
            if !state.environments.contains_key(environment) {
                tracing::info!(environment, "Creating environment");
                state
                    .environments
                    .insert(environment.to_string(), Environment::new(environment, false));
            }
            self.create(
                &mut state,
                pipeline.id,
                environment,
                strategy,
                pipeline.artifacts.clone(),
                None,
            )
        };

        self.execute(deployment).await
    }

    /// Redeploy the most recent successful deployment of the same
    /// environment made before `deployment_id`
    pub async fn rollback(&self, deployment_id: DeploymentId) -> PipewrightResult<Deployment> {
        let deployment = {
            let mut state = self.lock();
            let from = state.deployments.get(&deployment_id).cloned().ok_or_else(|| {
                PipewrightError::DeploymentNotFound {
                    id: deployment_id.to_string(),
                }
            })?;

            let target = state
                .deployments
                .values()
                .filter(|d| {
                    d.environment == from.environment
                        && d.status == DeploymentStatus::Success
                        && d.sequence < from.sequence
                })
                .max_by_key(|d| (d.deployed_at, d.sequence))
                .cloned()
                .ok_or_else(|| PipewrightError::NoRollbackTarget {
                    deployment: deployment_id.to_string(),
                    environment: from.environment.clone(),
                })?;

            tracing::info!(
                from = %deployment_id,
                to = %target.id,
                environment = %target.environment,
                "Rolling back"
            );

            self.create(
                &mut state,
                target.pipeline_id,
                &target.environment,
                target.strategy,
                target.artifacts.clone(),
                Some(target.id),
            )
        };

        self.execute(deployment).await
    }

    fn create(
        &self,
        state: &mut DeployState,
        pipeline_id: PipelineId,
        environment: &str,
        strategy: DeploymentStrategy,
        artifacts: Vec<Artifact>,
        rollback_to: Option<DeploymentId>,
    ) -> Deployment {
        let deployment = Deployment {
            id: DeploymentId::new(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            pipeline_id,
            environment: environment.to_string(),
            strategy,
            status: DeploymentStatus::Created,
            reason: None,
            artifacts,
            created_at: Utc::now(),
            deployed_at: None,
            finished_at: None,
            rollback_to,
        };
        state.deployments.insert(deployment.id, deployment.clone());
        tracing::info!(
            deployment = %deployment.id,
            pipeline = %pipeline_id,
            environment,
            %strategy,
            "Deployment created"
        );
        deployment
    }

    fn update(&self, deployment: &Deployment) {
        let mut state = self.lock();
        if deployment.status == DeploymentStatus::Success {
            if let Some(env) = state.environments.get_mut(&deployment.environment) {
                env.last_deployment_id = Some(deployment.id);
            }
        }
        state.deployments.insert(deployment.id, deployment.clone());
    }

    async fn execute(&self, mut deployment: Deployment) -> PipewrightResult<Deployment> {
        deployment.status = DeploymentStatus::Running;
        deployment.deployed_at = Some(Utc::now());
        self.update(&deployment);
        tracing::info!(deployment = %deployment.id, "Deployment running");

        let outcome = self.target.apply(&deployment).await;

        let (status, reason) = match outcome {
            DeployOutcome::Succeeded => (DeploymentStatus::Success, None),
            DeployOutcome::Failed(reason) => (DeploymentStatus::Failed, Some(reason)),
            DeployOutcome::Canceled(reason) => (DeploymentStatus::Canceled, Some(reason)),
        };
        deployment.status = status;
        deployment.reason = reason;
        deployment.finished_at = Some(Utc::now());
        self.update(&deployment);

        match deployment.status {
            DeploymentStatus::Success => {
                tracing::info!(deployment = %deployment.id, environment = %deployment.environment, "Deployment succeeded")
            }
            DeploymentStatus::Failed | DeploymentStatus::Canceled => tracing::warn!(
                deployment = %deployment.id,
                status = %deployment.status,
                reason = deployment.reason.as_deref().unwrap_or_default(),
                "Deployment did not succeed"
            ),
            DeploymentStatus::Created | DeploymentStatus::Running => {}
        }

        Ok(deployment)
    }
}
