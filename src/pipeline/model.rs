// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Compiled pipeline specs and run state
//!
//! A [`PipelineSpec`] is the validated, immutable form of a definition and
//! is shared between a pipeline and its retries. A [`Pipeline`] is one run
//! of a spec: it owns fresh [`Stage`] and [`Job`] records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::definition::{CacheDefinition, When};
use super::rules::{self, JobConditions};
use super::variables::{self, Variable, Variables};
use crate::artifacts::Artifact;
use crate::errors::ConfigurationError;
use crate::ids::{JobId, PipelineId, RunnerId};

// ─────────────────────────────────────────────────────────────────────────────
// Compiled specs
// ─────────────────────────────────────────────────────────────────────────────

/// Validated pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub name: String,
    pub stages: Vec<StageSpec>,
    pub variables: Variables,
}

impl PipelineSpec {
    /// Find a job spec by name
    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.stages.iter().flat_map(|s| s.jobs.iter()).find(|j| j.name == name)
    }

    /// Index of the stage that holds `job`
    pub fn stage_index_of(&self, job: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.jobs.iter().any(|j| j.name == job))
    }

    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|s| s.jobs.len()).sum()
    }
}

/// Validated stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub jobs: Vec<JobSpec>,
}

impl StageSpec {
    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Validated job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub stage: String,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub before_script: Vec<String>,
    pub script: Vec<String>,
    pub after_script: Vec<String>,
    pub needs: Vec<String>,
    pub variables: Variables,
    pub allow_failure: bool,
    pub retry: u32,
    /// Per-attempt timeout; the engine default applies when absent
    pub timeout: Option<Duration>,
    pub when: When,
    pub conditions: JobConditions,
    pub artifacts: Option<ArtifactsSpec>,
    pub cache: Option<CacheDefinition>,
}

impl JobSpec {
    /// Total attempts the job may make
    pub fn max_attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }
}

/// Validated artifact declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactsSpec {
    pub paths: Vec<String>,
    pub expire_in: Option<Duration>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Statuses and reasons
// ─────────────────────────────────────────────────────────────────────────────

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Pending | Self::Running => false,
            Self::Success | Self::Failed | Self::Canceled | Self::Skipped => true,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Stage status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    /// Succeeded, but an `allow_failure` job failed
    SuccessWithWarnings,
    Failed,
    Canceled,
    /// Never started because the pipeline halted
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Pending | Self::Running => false,
            Self::Success
            | Self::SuccessWithWarnings
            | Self::Failed
            | Self::Canceled
            | Self::Skipped => true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithWarnings)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::SuccessWithWarnings => "success_with_warnings",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Pending | Self::Running => false,
            Self::Success | Self::Failed | Self::Canceled => true,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Why a job ended the way it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobReason {
    /// A command exited non-zero
    ScriptFailure { command: String, exit_code: i32 },
    /// An attempt ran past its deadline
    TimeoutExceeded { timeout_ms: u64 },
    /// The backend could not run the job
    SystemFailure { message: String },
    /// No registered runner carries the required tags
    NoMatchingRunner { tags: Vec<String> },
    /// A dependency failed and the job runs on success
    DependencyFailed { dependency: String },
    /// A dependency was skipped or canceled
    DependencySkipped { dependency: String },
    /// `on_failure` job whose dependencies all succeeded
    WhenConditionNotMet,
    /// Manual job nobody started
    ManualActionRequired,
    /// An earlier stage failed and the pipeline halted
    UpstreamStageFailed { stage: String },
    /// The pipeline was canceled
    Canceled,
}

impl JobReason {
    /// Whether the reason describes a failure of the job itself
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::ScriptFailure { .. }
                | Self::TimeoutExceeded { .. }
                | Self::SystemFailure { .. }
                | Self::NoMatchingRunner { .. }
        )
    }
}

impl fmt::Display for JobReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptFailure { command, exit_code } => {
                write!(f, "command '{}' exited with code {}", command, exit_code)
            }
            Self::TimeoutExceeded { timeout_ms } => {
                write!(f, "timed out after {:.1}s", *timeout_ms as f64 / 1000.0)
            }
            Self::SystemFailure { message } => write!(f, "system failure: {}", message),
            Self::NoMatchingRunner { tags } => {
                write!(f, "no runner matches tags [{}]", tags.join(", "))
            }
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' failed", dependency)
            }
            Self::DependencySkipped { dependency } => {
                write!(f, "dependency '{}' did not run", dependency)
            }
            Self::WhenConditionNotMet => write!(f, "no dependency failed"),
            Self::ManualActionRequired => write!(f, "manual job was not started"),
            Self::UpstreamStageFailed { stage } => write!(f, "stage '{}' failed", stage),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job log
// ─────────────────────────────────────────────────────────────────────────────

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One line of a job log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only job log that redacts masked values
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    entries: Vec<LogEntry>,
    masked: Vec<String>,
}

impl JobLog {
    pub fn new(masked: Vec<String>) -> Self {
        Self {
            entries: Vec::new(),
            masked,
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl AsRef<str>) {
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: variables::mask(message.as_ref(), &self.masked),
        });
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Warning, message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Error, message);
    }

    /// Record command output line by line
    pub fn output(&mut self, level: LogLevel, output: &str) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.push(level, line);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run state
// ─────────────────────────────────────────────────────────────────────────────

/// What started a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    MergeRequest,
    Schedule,
    Api,
    Manual,
    Retry,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::MergeRequest => write!(f, "merge_request"),
            Self::Schedule => write!(f, "schedule"),
            Self::Api => write!(f, "api"),
            Self::Manual => write!(f, "manual"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// Source and context of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub git_ref: String,
    pub commit: String,
    /// Whether protected variables may be exposed
    #[serde(default)]
    pub protected_ref: bool,
    /// Variables supplied with the trigger; they override definition variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Trigger {
    pub fn new(kind: TriggerKind, git_ref: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
            commit: commit.into(),
            protected_ref: false,
            variables: BTreeMap::new(),
        }
    }

    pub fn push(git_ref: impl Into<String>, commit: impl Into<String>) -> Self {
        Self::new(TriggerKind::Push, git_ref, commit)
    }

    pub fn protected(mut self) -> Self {
        self.protected_ref = true;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// One job of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub stage: String,
    /// Policy after `rules` were applied
    pub when: When,
    pub allow_failure: bool,
    pub status: JobStatus,
    pub reason: Option<JobReason>,
    pub attempts: u32,
    pub runner_id: Option<RunnerId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<Artifact>,
    pub log: Vec<LogEntry>,
}

impl Job {
    fn new(spec: &JobSpec) -> Self {
        Self {
            id: JobId::new(),
            name: spec.name.clone(),
            stage: spec.stage.clone(),
            when: spec.when,
            allow_failure: spec.allow_failure,
            status: JobStatus::Pending,
            reason: None,
            attempts: 0,
            runner_id: None,
            started_at: None,
            finished_at: None,
            artifacts: Vec::new(),
            log: Vec::new(),
        }
    }

    /// Whether this job's outcome counts as a failure of its stage
    pub fn fails_stage(&self) -> bool {
        if self.allow_failure {
            return false;
        }
        match self.status {
            JobStatus::Failed => true,
            JobStatus::Skipped => {
                matches!(self.reason, Some(JobReason::DependencyFailed { .. }))
            }
            JobStatus::Pending
            | JobStatus::Running
            | JobStatus::Success
            | JobStatus::Canceled => false,
        }
    }

    /// Move to a terminal status without running
    pub(crate) fn settle(&mut self, status: JobStatus, reason: JobReason) {
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: format!("Job {} -> {}: {}", self.status, status, reason),
        });
        self.status = status;
        self.reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

/// One stage of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    pub status: StageStatus,
    pub reason: Option<String>,
    pub jobs: Vec<Job>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Stage {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.name == name)
    }

    /// Status derived from terminal job states
    pub fn derive_status(&self) -> StageStatus {
        if self.jobs.iter().any(Job::fails_stage) {
            StageStatus::Failed
        } else if self.jobs.iter().any(|j| j.status == JobStatus::Failed) {
            StageStatus::SuccessWithWarnings
        } else {
            StageStatus::Success
        }
    }
}

/// One run of a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub trigger: Trigger,
    pub status: PipelineStatus,
    pub reason: Option<String>,
    pub stages: Vec<Stage>,
    pub variables: Variables,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retried_from: Option<PipelineId>,
    /// Definitions this run was created from
    #[serde(skip)]
    pub spec: Arc<PipelineSpec>,
    /// Definitions that survived `only`/`except`/`rules` for this trigger
    #[serde(skip)]
    pub plan: Vec<StageSpec>,
}

impl Pipeline {
    /// Create a pending run of `spec` for `trigger`
    ///
    /// Conditions are evaluated against the trigger; excluded jobs are left
    /// out of the run and stages left without jobs are dropped.
    pub fn instantiate(
        spec: Arc<PipelineSpec>,
        trigger: Trigger,
    ) -> Result<Self, ConfigurationError> {
        let trigger_vars = trigger_variables(&trigger.variables);
        let variables = spec.variables.merged(&trigger_vars);
        let visible = variables.visible(trigger.protected_ref);

        let mut plan = Vec::new();
        for stage in &spec.stages {
            let mut jobs = Vec::new();
            for job in &stage.jobs {
                let job_env = job.variables.visible(trigger.protected_ref);
                let mut env = visible.clone();
                env.extend(job_env);

                if let Some(when) = rules::effective_when(job, &trigger.git_ref, &env)? {
                    let mut job = job.clone();
                    job.when = when;
                    jobs.push(job);
                }
            }
            if !jobs.is_empty() {
                plan.push(StageSpec {
                    name: stage.name.clone(),
                    jobs,
                });
            }
        }

        let included: Vec<&str> = plan
            .iter()
            .flat_map(|s| s.jobs.iter().map(|j| j.name.as_str()))
            .collect();
        if included.is_empty() {
            return Err(ConfigurationError::InvalidPipeline {
                reason: format!("no jobs of '{}' apply to ref '{}'", spec.name, trigger.git_ref),
            });
        }
        for job in plan.iter().flat_map(|s| s.jobs.iter()) {
            if let Some(missing) = job.needs.iter().find(|n| !included.contains(&n.as_str())) {
                return Err(ConfigurationError::NeedsExcludedJob {
                    job: job.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let stages = plan
            .iter()
            .map(|s| Stage {
                name: s.name.clone(),
                status: StageStatus::Pending,
                reason: None,
                jobs: s.jobs.iter().map(Job::new).collect(),
                started_at: None,
                finished_at: None,
            })
            .collect();

        Ok(Self {
            id: PipelineId::new(),
            name: spec.name.clone(),
            trigger,
            status: PipelineStatus::Pending,
            reason: None,
            stages,
            variables,
            artifacts: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retried_from: None,
            spec,
            plan,
        })
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.stages.iter().find_map(|s| s.job(name))
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.stages.iter_mut().find_map(|s| s.job_mut(name))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    /// Spec of a job included in this run
    pub fn job_spec(&self, name: &str) -> Option<&JobSpec> {
        self.plan.iter().find_map(|s| s.job(name))
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Summary in the run result shape
    pub fn result(&self) -> RunResult {
        RunResult {
            pipeline_id: self.id,
            name: self.name.clone(),
            status: self.status,
            reason: self.reason.clone(),
            duration_seconds: self.duration().map(|d| d.as_secs_f64()).unwrap_or(0.0),
            stages: self
                .stages
                .iter()
                .map(|s| StageResult {
                    stage: s.name.clone(),
                    status: s.status,
                    jobs: s
                        .jobs
                        .iter()
                        .map(|j| JobResult {
                            name: j.name.clone(),
                            status: j.status,
                            duration: j.duration().map(|d| d.as_secs_f64()).unwrap_or(0.0),
                            attempts: j.attempts,
                            reason: j.reason.as_ref().map(ToString::to_string),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn trigger_variables(values: &BTreeMap<String, String>) -> Variables {
    let mut vars = Variables::new();
    for (k, v) in values {
        vars.insert(k.clone(), Variable::plain(v.clone()));
    }
    vars
}

// ─────────────────────────────────────────────────────────────────────────────
// Run result
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_seconds: f64,
    pub stages: Vec<StageResult>,
}

impl RunResult {
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.stages.iter().flat_map(|s| s.jobs.iter()).find(|j| j.name == name)
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    pub jobs: Vec<JobResult>,
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub name: String,
    pub status: JobStatus,
    /// Seconds
    pub duration: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineDefinition, PipelineValidator};

    fn spec(yaml: &str) -> Arc<PipelineSpec> {
        let def = PipelineDefinition::from_yaml(yaml).unwrap();
        Arc::new(PipelineValidator::compile(&def).unwrap())
    }

    #[test]
    fn test_instantiate_creates_pending_records() {
        let spec = spec(
            r#"
name: app
stages: [build, test]
compile:
  stage: build
  script: [make]
unit:
  stage: test
  needs: [compile]
  script: [make test]
"#,
        );

        let pipeline = Pipeline::instantiate(spec, Trigger::push("main", "abc123")).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Pending);
        assert_eq!(pipeline.stages.len(), 2);
        assert!(pipeline.jobs().all(|j| j.status == JobStatus::Pending));
        assert_eq!(pipeline.job("unit").unwrap().stage, "test");
    }

    #[test]
    fn test_excluded_jobs_drop_out_of_the_run() {
        let spec = spec(
            r#"
name: app
stages: [build, deploy]
compile:
  stage: build
  script: [make]
publish:
  stage: deploy
  only: [main]
  script: [./publish]
"#,
        );

        let pipeline = Pipeline::instantiate(spec, Trigger::push("feature/x", "abc")).unwrap();
        assert!(pipeline.job("publish").is_none());
        assert!(pipeline.stage("deploy").is_none());
    }

    #[test]
    fn test_needing_an_excluded_job_is_a_configuration_error() {
        let spec = spec(
            r#"
name: app
stages: [build, test]
compile:
  stage: build
  only: [main]
  script: [make]
unit:
  stage: test
  needs: [compile]
  script: [make test]
"#,
        );

        let err = Pipeline::instantiate(spec, Trigger::push("dev", "abc")).unwrap_err();
        assert!(matches!(err, ConfigurationError::NeedsExcludedJob { .. }));
    }

    #[test]
    fn test_stage_status_derivation() {
        let spec = spec(
            r#"
name: app
stages: [test]
a:
  script: [x]
b:
  allow_failure: true
  script: [y]
"#,
        );
        let mut pipeline = Pipeline::instantiate(spec, Trigger::push("main", "c")).unwrap();

        pipeline.job_mut("a").unwrap().status = JobStatus::Success;
        pipeline.job_mut("b").unwrap().status = JobStatus::Failed;
        assert_eq!(
            pipeline.stage("test").unwrap().derive_status(),
            StageStatus::SuccessWithWarnings
        );

        pipeline.job_mut("a").unwrap().status = JobStatus::Failed;
        assert_eq!(pipeline.stage("test").unwrap().derive_status(), StageStatus::Failed);
    }

    #[test]
    fn test_job_log_masks_values() {
        let mut log = JobLog::new(vec!["topsecret".into()]);
        log.info("$ deploy --token topsecret");
        assert_eq!(log.entries()[0].message, "$ deploy --token [MASKED]");
    }
}
