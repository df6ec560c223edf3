// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Job execution and stage scheduling

mod job;
mod stage;

pub use job::{
    ExecutorSettings, JobContext, JobExecutor, JobReport, JobRunOutcome, JobStart, RunningJob,
};
pub use stage::StageScheduler;
