// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Pipeline definition structures
//!
//! The declarative shape a pipeline is written in. Every top-level key other
//! than `name`, `stages` and `variables` is a job. Unknown job keys are
//! rejected while parsing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::errors::PipewrightError;

/// Pipeline definition as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Stages in execution order
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    /// Global variables
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDefinition>,

    /// Jobs keyed by name
    #[serde(flatten)]
    pub jobs: BTreeMap<String, JobDefinition>,
}

fn default_stages() -> Vec<String> {
    vec!["build".into(), "test".into(), "deploy".into()]
}

impl PipelineDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, PipewrightError> {
        let content = std::fs::read_to_string(path).map_err(|e| PipewrightError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipewrightError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a definition from a JSON string
    pub fn from_json(json: &str) -> Result<Self, PipewrightError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Serialize the definition to YAML
    pub fn to_yaml(&self) -> Result<String, PipewrightError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a job by name
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    /// Names of the jobs assigned to a stage
    pub fn jobs_in_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.jobs
            .iter()
            .filter(move |(_, job)| job.stage == stage)
            .map(|(name, _)| name.as_str())
    }
}

/// A single job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    /// Stage the job belongs to
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Image the job wants to run in
    #[serde(default)]
    pub image: Option<String>,

    /// Runner capability tags the job requires
    #[serde(default)]
    pub tags: Vec<String>,

    /// Commands run before the main script
    #[serde(default)]
    pub before_script: Vec<String>,

    /// Main commands
    pub script: Vec<String>,

    /// Commands run after the main script, whatever its outcome
    #[serde(default)]
    pub after_script: Vec<String>,

    /// Jobs that must finish first (same or earlier stage)
    #[serde(default)]
    pub needs: Vec<String>,

    /// Job variables, overriding global ones
    #[serde(default)]
    pub variables: BTreeMap<String, VariableDefinition>,

    /// Let the job fail without failing its stage
    #[serde(default)]
    pub allow_failure: bool,

    /// Extra attempts after a failure
    #[serde(default)]
    pub retry: u32,

    /// Per-attempt timeout
    #[serde(default)]
    pub timeout: Option<DurationValue>,

    /// When the job runs relative to its dependencies
    #[serde(default)]
    pub when: When,

    /// Refs the job is limited to
    #[serde(default)]
    pub only: Vec<String>,

    /// Refs the job never runs for
    #[serde(default)]
    pub except: Vec<String>,

    /// Ordered conditional rules; the first match decides `when`
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Files kept after a successful run
    #[serde(default)]
    pub artifacts: Option<ArtifactsDefinition>,

    /// Build cache
    #[serde(default)]
    pub cache: Option<CacheDefinition>,
}

fn default_stage() -> String {
    "test".to_string()
}

/// When a job runs once its dependencies are terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum When {
    /// Run only if no dependency failed
    #[default]
    OnSuccess,
    /// Run only if a dependency failed
    OnFailure,
    /// Run regardless of dependency outcome
    Always,
    /// Wait for a person to start it
    Manual,
    /// Exclude the job (only meaningful inside `rules`)
    Never,
}

impl std::fmt::Display for When {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnSuccess => write!(f, "on_success"),
            Self::OnFailure => write!(f, "on_failure"),
            Self::Always => write!(f, "always"),
            Self::Manual => write!(f, "manual"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// A conditional rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Condition; a rule without one always matches
    #[serde(rename = "if", default)]
    pub condition: Option<RuleCondition>,

    /// Policy applied when the rule matches
    #[serde(default)]
    pub when: When,
}

/// All present fields must match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleCondition {
    /// Ref pattern, exact or `/regex/`
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,

    /// Variable that must be set
    #[serde(default)]
    pub variable: Option<String>,

    /// Required value of `variable`
    #[serde(default)]
    pub equals: Option<String>,
}

/// Files a job publishes as artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsDefinition {
    /// Paths or glob patterns, relative to the job workspace
    pub paths: Vec<String>,

    /// How long artifacts are kept
    #[serde(default)]
    pub expire_in: Option<DurationValue>,
}

/// Paths a job shares through the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheDefinition {
    /// Explicit key shared between jobs; derived from job name and paths if absent
    #[serde(default)]
    pub key: Option<String>,

    /// Cached paths
    pub paths: Vec<String>,

    /// Whether the job pulls, pushes or both
    #[serde(default)]
    pub policy: CachePolicy,
}

/// Cache pull/push policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    Pull,
    Push,
    #[default]
    PullPush,
}

impl CachePolicy {
    pub fn pulls(&self) -> bool {
        matches!(self, Self::Pull | Self::PullPush)
    }

    pub fn pushes(&self) -> bool {
        matches!(self, Self::Push | Self::PullPush)
    }
}

/// Variable value, plain or with visibility flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableDefinition {
    Plain(ScalarValue),
    Detailed {
        value: ScalarValue,
        #[serde(default)]
        masked: bool,
        #[serde(default)]
        protected: bool,
    },
}

impl VariableDefinition {
    pub fn value(&self) -> String {
        match self {
            Self::Plain(v) | Self::Detailed { value: v, .. } => v.to_string(),
        }
    }

    pub fn masked(&self) -> bool {
        matches!(self, Self::Detailed { masked: true, .. })
    }

    pub fn protected(&self) -> bool {
        matches!(self, Self::Detailed { protected: true, .. })
    }
}

impl From<&str> for VariableDefinition {
    fn from(value: &str) -> Self {
        Self::Plain(ScalarValue::String(value.to_string()))
    }
}

/// YAML scalars accepted as variable values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A duration given as seconds or as text such as `"1h 30m"` or `"500ms"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            Self::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            Self::Text(text) => parse_duration(text),
        }
    }
}

/// Parse `"90"`, `"1h 30m"`, `"2 days"`, `"250ms"` into a duration
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".into());
    }

    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{}'", text));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", text))?;
        rest = rest[digits..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = rest[unit_len..].trim_start();

        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(amount),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(amount * 60),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(amount * 3600),
            "d" | "day" | "days" => Duration::from_secs(amount * 86_400),
            "w" | "week" | "weeks" => Duration::from_secs(amount * 604_800),
            "" => return Err(format!("missing unit in duration '{}'", text)),
            other => return Err(format!("unknown duration unit '{}'", other)),
        };
        total += part;
    }

    Ok(total)
}
