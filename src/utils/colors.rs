// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Terminal color utilities
//!
//! Provides consistent status colors and glyphs across the CLI.

use colored::{ColoredString, Colorize};

use crate::pipeline::{JobStatus, PipelineStatus, StageStatus};

/// Glyph and styled label for a job status
pub fn job_status(status: JobStatus) -> (ColoredString, ColoredString) {
    let label = status.to_string();
    match status {
        JobStatus::Success => ("✓".green(), label.green()),
        JobStatus::Failed => ("✗".red(), label.red()),
        JobStatus::Canceled => ("⊘".yellow(), label.yellow()),
        JobStatus::Skipped => ("↷".dimmed(), label.dimmed()),
        JobStatus::Pending | JobStatus::Running => ("…".blue(), label.blue()),
    }
}

/// Glyph and styled label for a stage status
pub fn stage_status(status: StageStatus) -> (ColoredString, ColoredString) {
    let label = status.to_string();
    match status {
        StageStatus::Success => ("✓".green(), label.green()),
        StageStatus::SuccessWithWarnings => ("⚠".yellow(), label.yellow()),
        StageStatus::Failed => ("✗".red(), label.red()),
        StageStatus::Canceled => ("⊘".yellow(), label.yellow()),
        StageStatus::Skipped => ("↷".dimmed(), label.dimmed()),
        StageStatus::Pending | StageStatus::Running => ("…".blue(), label.blue()),
    }
}

/// Styled pipeline status
pub fn pipeline_status(status: PipelineStatus) -> ColoredString {
    let label = status.to_string().to_uppercase();
    match status {
        PipelineStatus::Success => label.green().bold(),
        PipelineStatus::Failed => label.red().bold(),
        PipelineStatus::Canceled => label.yellow().bold(),
        PipelineStatus::Pending | PipelineStatus::Running => label.blue().bold(),
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}
