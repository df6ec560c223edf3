// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! # pipewright - CI Pipeline Orchestrator
//!
//! `pipewright` runs CI pipelines: ordered stages of jobs whose `needs`
//! form a dependency graph, executed on a pool of tagged runners.
//!
//! ## Features
//!
//! - **Job DAGs** - jobs start as soon as their `needs` finish
//! - **Runner pool** - exclusive, tag-matched runner leases
//! - **Retries and timeouts** - per-attempt deadlines, cooperative cancel
//! - **Artifacts and caches** - content-addressed blob storage
//! - **Deployments** - environments, strategies and rollbacks
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a pipeline definition
//! pipewright validate .pipewright.yml
//!
//! # Render its job graph
//! pipewright graph --format mermaid
//!
//! # Run it for a ref
//! pipewright run --ref main
//! ```

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod errors;
pub mod executors;
pub mod ids;
pub mod pipeline;
pub mod runners;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use errors::{ConfigurationError, PipewrightError, PipewrightResult};
pub use ids::{ArtifactId, DeploymentId, JobId, PipelineId, RunnerId};
pub use pipeline::{Pipeline, PipelineDefinition, PipelineSpec, RunResult, Trigger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
