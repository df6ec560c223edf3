// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::load_definition;
use crate::pipeline::PipelineValidator;
use crate::utils::{print_error, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let definition = match load_definition(&pipeline_path) {
        Ok(d) => d,
        Err(e) => {
            print_error("Failed to parse pipeline");
            println!();
            return Err(e);
        }
    };
    print_success("Pipeline file parsed");

    let validation = PipelineValidator::validate(&definition);

    if !validation.errors.is_empty() {
        print_section(&"Errors".red().bold().to_string());
        for error in &validation.errors {
            print_error(&error.to_string());
        }
    }

    if validation.has_warnings() {
        print_section(&"Warnings".yellow().bold().to_string());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        if let Some(spec) = &validation.spec {
            print_section("Pipeline summary");
            println!("  Name: {}", spec.name);
            println!("  Stages: {}", spec.stages.len());
            for stage in &spec.stages {
                println!("    - {} ({} jobs)", stage.name, stage.jobs.len());
                for job in &stage.jobs {
                    let needs = if job.needs.is_empty() {
                        String::new()
                    } else {
                        format!(" [needs: {}]", job.needs.join(", "))
                    };
                    println!("        {} ({}){}", job.name, job.when, needs.dimmed());
                }
            }
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!(
            "Pipeline validation failed with {} error(s)",
            validation.errors.len()
        ));
    }

    if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }
    Ok(())
}
