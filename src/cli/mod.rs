// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for pipewright.

pub mod graph;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::pipeline::PipelineDefinition;

/// Default pipeline file name
pub const DEFAULT_PIPELINE: &str = ".pipewright.yml";

/// CI pipeline orchestrator
///
/// Run staged pipelines of jobs on a pool of runners.
#[derive(Parser, Debug)]
#[clap(
    name = "pipewright",
    version,
    about = "CI pipeline orchestrator: stages, job DAGs, runners, artifacts and deployments",
    long_about = None,
    after_help = "Examples:\n\
        pipewright validate                 Check .pipewright.yml\n\
        pipewright graph -f mermaid         Render the job graph\n\
        pipewright run --ref main           Run the pipeline for a ref\n\n\
        See 'pipewright <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Engine configuration file (defaults to pipewright.toml)
    #[clap(long, global = true, env = "PIPEWRIGHT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Git ref the pipeline runs for
        #[clap(long = "ref", default_value = "main")]
        git_ref: String,

        /// Commit SHA exposed as CI_COMMIT_SHA
        #[clap(long, default_value = "HEAD")]
        commit: String,

        /// Treat the ref as protected (exposes protected variables)
        #[clap(long)]
        protected: bool,

        /// Pipeline variable override, KEY=VALUE (repeatable)
        #[clap(long = "var", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Local runners to start when the configuration declares none
        #[clap(long, default_value = "2")]
        runners: usize,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load a pipeline file, with a hint when it is missing
pub(crate) fn load_definition(path: &Path) -> miette::Result<PipelineDefinition> {
    if !path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Create {} or pass a path.",
            path.display(),
            DEFAULT_PIPELINE
        ));
    }
    PipelineDefinition::from_file(path)
        .map_err(|e| miette::miette!("Failed to load pipeline: {}", e))
}

/// Engine configuration from `--config` or the working directory
pub(crate) fn load_config(config: Option<&Path>) -> miette::Result<EngineConfig> {
    match config {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
            Ok(EngineConfig::discover(&cwd)?)
        }
    }
}

/// Split `KEY=VALUE`
pub(crate) fn parse_variable(raw: &str) -> miette::Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(miette::miette!(
            "Invalid variable '{}': expected KEY=VALUE",
            raw
        )),
    }
}
