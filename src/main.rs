// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! pipewright - CI pipeline orchestrator
//!
//! Run staged pipelines of jobs with dependency graphs on a runner pool.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipewright::cli::{run::RunOptions, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipewright=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            pipeline,
            git_ref,
            commit,
            protected,
            variables,
            runners,
            format,
        } => {
            let options = RunOptions {
                pipeline,
                git_ref,
                commit,
                protected,
                variables,
                runners,
                format,
                config: cli.config,
            };
            pipewright::cli::run::run(options, cli.verbose).await
        }
        Commands::Validate { pipeline } => {
            pipewright::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            pipewright::cli::graph::run(pipeline, format, cli.verbose).await
        }
    }
}
