// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Configuration errors
//!
//! Raised while compiling a pipeline definition, before any job runs.

use miette::Diagnostic;
use thiserror::Error;

/// A pipeline definition that cannot be scheduled
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Pipeline has no stages defined")]
    #[diagnostic(
        code(pipewright::config::no_stages),
        help("Declare at least one stage under 'stages:'")
    )]
    NoStages,

    #[error("Stage '{stage}' is declared more than once")]
    #[diagnostic(code(pipewright::config::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("Job '{job}' uses undeclared stage '{stage}'")]
    #[diagnostic(
        code(pipewright::config::unknown_stage),
        help("Add '{stage}' to the pipeline's 'stages:' list")
    )]
    UnknownStage { job: String, stage: String },

    #[error("Job '{job}' needs unknown job '{dependency}'")]
    #[diagnostic(
        code(pipewright::config::unknown_dependency),
        help("Check that '{dependency}' is defined in your pipeline")
    )]
    UnknownDependency { job: String, dependency: String },

    #[error("Job '{job}' needs '{dependency}' from later stage '{stage}'")]
    #[diagnostic(
        code(pipewright::config::forward_dependency),
        help("'needs' may only reference jobs in the same or an earlier stage")
    )]
    ForwardDependency {
        job: String,
        dependency: String,
        stage: String,
    },

    #[error("Circular dependency detected in stage '{stage}': {}", .jobs.join(" -> "))]
    #[diagnostic(
        code(pipewright::config::circular_dependency),
        help("Review the 'needs' of these jobs to remove the cycle")
    )]
    CircularDependency { stage: String, jobs: Vec<String> },

    #[error("Job '{job}' needs '{dependency}', which is excluded from this pipeline")]
    #[diagnostic(
        code(pipewright::config::needs_excluded_job),
        help("Align the 'only'/'except'/'rules' conditions of both jobs")
    )]
    NeedsExcludedJob { job: String, dependency: String },

    #[error("Job '{job}' is invalid: {reason}")]
    #[diagnostic(code(pipewright::config::invalid_job))]
    InvalidJob { job: String, reason: String },

    #[error("Invalid pipeline definition: {reason}")]
    #[diagnostic(code(pipewright::config::invalid_pipeline))]
    InvalidPipeline { reason: String },
}
