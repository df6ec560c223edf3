// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Error types
//!
//! Configuration problems are fatal and surface before a pipeline starts.
//! Job failures are not errors at this level: they are recorded on the job
//! as a [`crate::pipeline::JobReason`] and aggregated into stage and pipeline
//! status.

mod configuration;

pub use configuration::ConfigurationError;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipewright operations
pub type PipewrightResult<T> = Result<T, PipewrightError>;

/// Main error type for pipewright
#[derive(Error, Debug, Diagnostic)]
pub enum PipewrightError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),

    // ─────────────────────────────────────────────────────────────────────────
    // Runner Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Runner '{runner}' is not registered")]
    #[diagnostic(code(pipewright::runner_not_found))]
    RunnerNotFound { runner: String },

    #[error("Runner '{runner}' is already registered")]
    #[diagnostic(code(pipewright::runner_already_registered))]
    RunnerAlreadyRegistered { runner: String },

    #[error("Runner '{runner}' has no job to release")]
    #[diagnostic(
        code(pipewright::runner_not_busy),
        help("Only a runner returned by acquire() can be released, and only once")
    )]
    RunnerNotBusy { runner: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline '{id}' not found")]
    #[diagnostic(code(pipewright::pipeline_not_found))]
    PipelineNotFound { id: String },

    #[error("Pipeline '{id}' cannot {action} while {status}")]
    #[diagnostic(code(pipewright::invalid_transition))]
    InvalidTransition {
        id: String,
        status: String,
        action: String,
    },

    #[error("Job '{job}' not found in pipeline '{pipeline}'")]
    #[diagnostic(code(pipewright::job_not_found))]
    JobNotFound { pipeline: String, job: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Deployment Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cannot deploy pipeline '{pipeline}' to '{environment}': pipeline is {status}")]
    #[diagnostic(
        code(pipewright::deployment_precondition),
        help("Only pipelines that finished with status 'success' can be deployed")
    )]
    DeploymentPrecondition {
        pipeline: String,
        environment: String,
        status: String,
    },

    #[error("Deployment '{id}' not found")]
    #[diagnostic(code(pipewright::deployment_not_found))]
    DeploymentNotFound { id: String },

    #[error("Environment '{name}' not found")]
    #[diagnostic(code(pipewright::environment_not_found))]
    EnvironmentNotFound { name: String },

    #[error("No earlier successful deployment of '{environment}' to roll back to from '{deployment}'")]
    #[diagnostic(code(pipewright::no_rollback_target))]
    NoRollbackTarget {
        deployment: String,
        environment: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Artifact & Cache Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Artifact '{path}' of job '{job}' not found")]
    #[diagnostic(code(pipewright::artifact_not_found))]
    ArtifactNotFound { job: String, path: String },

    #[error("Blob store error: {message}")]
    #[diagnostic(code(pipewright::blob_store))]
    BlobStore { message: String },

    #[error("Cache error: {message}")]
    #[diagnostic(code(pipewright::cache_error))]
    CacheError { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Execution backend '{backend}' failed: {error}")]
    #[diagnostic(code(pipewright::backend_failed))]
    Backend {
        backend: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Internal error: {message}")]
    #[diagnostic(code(pipewright::internal))]
    Internal { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(pipewright::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(pipewright::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(pipewright::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(pipewright::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(pipewright::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(pipewright::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for PipewrightError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for PipewrightError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for PipewrightError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for PipewrightError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for PipewrightError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl PipewrightError {
    /// Whether this error rejects the pipeline configuration itself
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Create a backend failure with an optional hint
    pub fn backend(backend: &str, error: impl ToString, help: Option<String>) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            error: error.to_string(),
            help,
        }
    }

    pub(crate) fn pipeline_not_found(id: impl ToString) -> Self {
        Self::PipelineNotFound { id: id.to_string() }
    }
}
