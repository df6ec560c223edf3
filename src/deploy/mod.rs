// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Deployments and environments
//!
//! Deployments move through `Created -> Running -> {Success, Failed,
//! Canceled}`. Only successful pipelines can be deployed. A rollback is a
//! new deployment of an earlier successful deployment's artifacts.

mod manager;
mod target;

pub use manager::DeploymentManager;
pub use target::{DeployOutcome, DeploymentTarget, RecordingTarget};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::artifacts::Artifact;
use crate::ids::{DeploymentId, PipelineId};

/// A named deploy target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    /// Protected environments must be declared up front
    pub protected: bool,
    pub last_deployment_id: Option<DeploymentId>,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(name: impl Into<String>, protected: bool) -> Self {
        Self {
            name: name.into(),
            protected,
            last_deployment_id: None,
            created_at: Utc::now(),
        }
    }
}

/// How a deployment is rolled out; recorded only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    #[default]
    Rolling,
    BlueGreen,
    Canary,
    Recreate,
    #[serde(rename = "a_b_testing")]
    ABTesting,
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rolling => write!(f, "rolling"),
            Self::BlueGreen => write!(f, "blue_green"),
            Self::Canary => write!(f, "canary"),
            Self::Recreate => write!(f, "recreate"),
            Self::ABTesting => write!(f, "a_b_testing"),
        }
    }
}

impl FromStr for DeploymentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "rolling" => Ok(Self::Rolling),
            "blue_green" => Ok(Self::BlueGreen),
            "canary" => Ok(Self::Canary),
            "recreate" => Ok(Self::Recreate),
            "a_b_testing" | "ab_testing" => Ok(Self::ABTesting),
            other => Err(format!("unknown deployment strategy '{}'", other)),
        }
    }
}

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Created,
    Running,
    Success,
    Failed,
    Canceled,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Created | Self::Running => false,
            Self::Success | Self::Failed | Self::Canceled => true,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// One rollout of a pipeline's artifacts to an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Creation order across all environments
    pub sequence: u64,
    pub pipeline_id: PipelineId,
    pub environment: String,
    pub strategy: DeploymentStrategy,
    pub status: DeploymentStatus,
    pub reason: Option<String>,
    /// Artifacts rolled out
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    /// When the rollout started
    pub deployed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Deployment whose artifacts this one restores
    pub rollback_to: Option<DeploymentId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("blue-green".parse(), Ok(DeploymentStrategy::BlueGreen));
        assert_eq!("a_b_testing".parse(), Ok(DeploymentStrategy::ABTesting));
        assert!("big-bang".parse::<DeploymentStrategy>().is_err());
        assert_eq!(DeploymentStrategy::default().to_string(), "rolling");
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&DeploymentStrategy::ABTesting).unwrap();
        assert_eq!(json, "\"a_b_testing\"");
        let json = serde_json::to_string(&DeploymentStrategy::BlueGreen).unwrap();
        assert_eq!(json, "\"blue_green\"");
    }
}
