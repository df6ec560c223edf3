// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Run command - execute the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_config, load_definition, parse_variable, OutputFormat};
use crate::engine::Engine;
use crate::pipeline::{PipelineStatus, PipelineValidator, RunResult, Trigger, TriggerKind};
use crate::utils::{job_status, pipeline_status, print_error, print_header, print_warning, stage_status};

/// Options of the run command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pipeline: PathBuf,
    pub git_ref: String,
    pub commit: String,
    pub protected: bool,
    pub variables: Vec<String>,
    pub runners: usize,
    pub format: OutputFormat,
    pub config: Option<PathBuf>,
}

/// Run the pipeline
pub async fn run(options: RunOptions, verbose: bool) -> Result<()> {
    let definition = load_definition(&options.pipeline)?;

    let validation = PipelineValidator::validate(&definition);
    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let mut config = load_config(options.config.as_deref())?;
    if config.runners.is_empty() {
        config = config.with_local_runners(options.runners.max(1));
    }

    let mut trigger = Trigger::new(TriggerKind::Manual, &options.git_ref, &options.commit);
    if options.protected {
        trigger = trigger.protected();
    }
    for raw in &options.variables {
        let (key, value) = parse_variable(raw)?;
        trigger = trigger.with_variable(key, value);
    }

    let engine = Engine::builder(config).build()?;
    let id = engine.submit(&definition, trigger).await?;
    let result = engine.run(id).await?;

    match options.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| miette::miette!("Failed to serialize result: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            print_result(&result);
            if verbose {
                for stage in &result.stages {
                    for job in &stage.jobs {
                        let log = engine.job_log(id, &job.name).await?;
                        println!();
                        println!("{}", format!("── {} ──", job.name).bold());
                        for entry in log {
                            println!(
                                "{} {}",
                                entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                                entry.message
                            );
                        }
                    }
                }
            }
        }
    }

    if result.status != PipelineStatus::Success {
        return Err(miette::miette!(
            "Pipeline {}: {}",
            result.status,
            result.reason.as_deref().unwrap_or("no reason recorded")
        ));
    }

    Ok(())
}

fn print_result(result: &RunResult) {
    print_header(&format!("Pipeline {} ({})", result.name, result.pipeline_id));

    for stage in &result.stages {
        let (glyph, label) = stage_status(stage.status);
        println!();
        println!("{} {} {}", glyph, stage.stage.bold(), label);

        for job in &stage.jobs {
            let (glyph, label) = job_status(job.status);
            let attempts = if job.attempts > 1 {
                format!(", {} attempts", job.attempts)
            } else {
                String::new()
            };
            println!(
                "    {} {} {} {}",
                glyph,
                job.name,
                label,
                format!("({:.2}s{})", job.duration, attempts).dimmed()
            );
            if let Some(reason) = &job.reason {
                if job.status.is_terminal() && job.status != crate::pipeline::JobStatus::Success {
                    println!("        {}", reason.dimmed());
                }
            }
        }
    }

    println!();
    println!(
        "{} in {:.2}s",
        pipeline_status(result.status),
        result.duration_seconds
    );
    match result.status {
        PipelineStatus::Success => {}
        PipelineStatus::Canceled => print_warning("Pipeline was canceled"),
        _ => {
            if let Some(reason) = &result.reason {
                print_error(reason);
            }
        }
    }
}
