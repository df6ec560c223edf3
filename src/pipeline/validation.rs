// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Pipeline validation
//!
//! Compiles a [`PipelineDefinition`] into a [`PipelineSpec`], rejecting
//! anything that cannot be scheduled before a run starts.

use std::collections::HashSet;
use std::time::Duration;

use super::dag::JobGraph;
use super::definition::{JobDefinition, PipelineDefinition, When};
use super::model::{ArtifactsSpec, JobSpec, PipelineSpec, StageSpec};
use super::rules::{JobConditions, RefPattern};
use super::variables::Variables;
use crate::errors::ConfigurationError;

/// Top-level keys that cannot name a job
pub const RESERVED_KEYS: &[&str] = &["name", "stages", "variables"];

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Compile a definition, failing on the first configuration error
    pub fn compile(def: &PipelineDefinition) -> Result<PipelineSpec, ConfigurationError> {
        let result = Self::validate(def);
        match result.errors.into_iter().next() {
            Some(err) => Err(err),
            None => result.spec.ok_or_else(|| ConfigurationError::InvalidPipeline {
                reason: "pipeline could not be compiled".into(),
            }),
        }
    }

    /// Report every error and warning of a definition
    pub fn validate(def: &PipelineDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if def.stages.is_empty() {
            result.add_error(ConfigurationError::NoStages);
        }

        let mut seen = HashSet::new();
        for stage in &def.stages {
            if !seen.insert(stage.as_str()) {
                result.add_error(ConfigurationError::DuplicateStage {
                    stage: stage.clone(),
                });
            }
        }

        let mut stages: Vec<StageSpec> = Vec::new();
        for name in &def.stages {
            if stages.iter().any(|s| &s.name == name) {
                continue;
            }
            stages.push(StageSpec {
                name: name.clone(),
                jobs: Vec::new(),
            });
        }

        for (name, job) in &def.jobs {
            let Some(spec) = Self::compile_job(name, job, &mut result) else {
                continue;
            };
            match stages.iter_mut().find(|s| s.name == spec.stage) {
                Some(stage) => stage.jobs.push(spec),
                None => result.add_error(ConfigurationError::UnknownStage {
                    job: name.clone(),
                    stage: job.stage.clone(),
                }),
            }
        }

        for stage in &stages {
            if stage.jobs.is_empty() {
                result.add_warning(format!("Stage '{}' has no jobs", stage.name));
            }
        }

        if result.is_valid() && stages.iter().all(|s| s.jobs.is_empty()) && !stages.is_empty() {
            result.add_error(ConfigurationError::InvalidPipeline {
                reason: "pipeline defines no jobs".into(),
            });
        }

        // Dependency checks run per stage so every broken stage is reported
        for index in 0..stages.len() {
            if let Err(err) = JobGraph::build(&stages, index) {
                result.add_error(err);
            }
        }

        if result.is_valid() {
            result.spec = Some(PipelineSpec {
                name: def.name.clone(),
                stages,
                variables: Variables::from_definitions(&def.variables),
            });
        }

        result
    }

    fn compile_job(
        name: &str,
        job: &JobDefinition,
        result: &mut ValidationResult,
    ) -> Option<JobSpec> {
        let errors_before = result.errors.len();
        let invalid = |reason: String| ConfigurationError::InvalidJob {
            job: name.to_string(),
            reason,
        };

        if name.trim().is_empty() {
            result.add_error(invalid("job name is empty".into()));
        }
        if RESERVED_KEYS.contains(&name) {
            result.add_error(invalid(format!("'{}' is a reserved key", name)));
        }
        if job.script.iter().all(|line| line.trim().is_empty()) {
            result.add_error(invalid("'script' must contain at least one command".into()));
        }
        if job.when == When::Never {
            result.add_error(invalid("'when: never' is only valid inside 'rules'".into()));
        }

        let timeout = match job.timeout.as_ref().map(|t| t.to_duration()) {
            Some(Ok(d)) if d == Duration::ZERO => {
                result.add_error(invalid("timeout must be greater than zero".into()));
                None
            }
            Some(Ok(d)) => Some(d),
            Some(Err(e)) => {
                result.add_error(invalid(format!("invalid timeout: {}", e)));
                None
            }
            None => None,
        };

        let artifacts = match &job.artifacts {
            Some(a) if a.paths.is_empty() => {
                result.add_error(invalid("'artifacts.paths' is empty".into()));
                None
            }
            Some(a) => {
                let expire_in = match a.expire_in.as_ref().map(|e| e.to_duration()) {
                    Some(Ok(d)) => Some(d),
                    Some(Err(e)) => {
                        result.add_error(invalid(format!("invalid artifacts.expire_in: {}", e)));
                        None
                    }
                    None => None,
                };
                Some(ArtifactsSpec {
                    paths: a.paths.clone(),
                    expire_in,
                })
            }
            None => None,
        };

        if let Some(cache) = &job.cache {
            if cache.paths.is_empty() {
                result.add_error(invalid("'cache.paths' is empty".into()));
            }
        }

        let conditions = JobConditions {
            only: job.only.clone(),
            except: job.except.clone(),
            rules: job.rules.clone(),
        };
        for pattern in conditions.ref_patterns() {
            if let Err(e) = RefPattern::parse(pattern) {
                result.add_error(invalid(format!("invalid ref pattern '{}': {}", pattern, e)));
            }
        }

        let mut needs_seen = HashSet::new();
        for need in &job.needs {
            if !needs_seen.insert(need.as_str()) {
                result.add_warning(format!("Job '{}' lists '{}' in needs twice", name, need));
            }
        }
        if job.retry > 0 && job.when == When::Manual {
            result.add_warning(format!(
                "Job '{}' is manual; its retry count only applies once started",
                name
            ));
        }
        if job.when == When::OnFailure && job.needs.is_empty() {
            result.add_warning(format!(
                "Job '{}' runs on_failure but has no needs, so it will always be skipped",
                name
            ));
        }

        if result.errors.len() > errors_before {
            return None;
        }

        let mut needs = Vec::new();
        for need in &job.needs {
            if !needs.contains(need) {
                needs.push(need.clone());
            }
        }

        Some(JobSpec {
            name: name.to_string(),
            stage: job.stage.clone(),
            image: job.image.clone(),
            tags: job.tags.clone(),
            before_script: job.before_script.clone(),
            script: job.script.clone(),
            after_script: job.after_script.clone(),
            needs,
            variables: Variables::from_definitions(&job.variables),
            allow_failure: job.allow_failure,
            retry: job.retry,
            timeout,
            when: job.when,
            conditions,
            artifacts,
            cache: job.cache.clone(),
        })
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigurationError>,
    pub warnings: Vec<String>,
    /// Compiled spec, present when there were no errors
    pub spec: Option<PipelineSpec>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ConfigurationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationResult {
        PipelineValidator::validate(&PipelineDefinition::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_compile_orders_stages_as_declared() {
        let def = PipelineDefinition::from_yaml(
            r#"
name: app
stages: [build, test, deploy]
ship:
  stage: deploy
  script: [./ship]
compile:
  stage: build
  script: [make]
  timeout: 30m
"#,
        )
        .unwrap();

        let spec = PipelineValidator::compile(&def).unwrap();
        let names: Vec<_> = spec.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy"]);
        assert_eq!(spec.job("compile").unwrap().timeout, Some(Duration::from_secs(1800)));
        assert_eq!(spec.job_count(), 2);
    }

    #[test]
    fn test_empty_stages() {
        let result = validate("name: empty\nstages: []\n");
        assert!(!result.is_valid());
        assert_eq!(result.errors[0], ConfigurationError::NoStages);
    }

    #[test]
    fn test_duplicate_stage() {
        let result = validate(
            r#"
name: dup
stages: [build, build]
compile:
  stage: build
  script: [make]
"#,
        );
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigurationError::DuplicateStage { .. })));
    }

    #[test]
    fn test_unknown_stage_and_empty_script() {
        let result = validate(
            r#"
name: bad
stages: [build]
lint:
  stage: check
  script: [cargo clippy]
noop:
  stage: build
  script: []
"#,
        );
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigurationError::UnknownStage { job, .. } if job == "lint")));
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigurationError::InvalidJob { job, .. } if job == "noop")));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = validate(
            r#"
name: t
stages: [build]
compile:
  stage: build
  script: [make]
  timeout: 0
"#,
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn test_reports_every_broken_stage() {
        let result = validate(
            r#"
name: broken
stages: [build, test]
a:
  stage: build
  needs: [b]
  script: [x]
b:
  stage: build
  needs: [a]
  script: [x]
c:
  stage: test
  needs: [ghost]
  script: [x]
"#,
        );

        assert_eq!(result.errors.len(), 2);
        assert!(result.spec.is_none());
        assert!(matches!(
            result.errors[0],
            ConfigurationError::CircularDependency { .. }
        ));
        assert!(matches!(
            result.errors[1],
            ConfigurationError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_warnings() {
        let result = validate(
            r#"
name: warn
stages: [build, test, deploy]
compile:
  stage: build
  script: [make]
ship:
  stage: deploy
  when: manual
  retry: 1
  script: [./ship]
"#,
        );

        assert!(result.is_valid());
        assert!(result.has_warnings());
        assert!(result.warnings.iter().any(|w| w.contains("'test' has no jobs")));
        assert!(result.warnings.iter().any(|w| w.contains("manual")));
    }

    #[test]
    fn test_reserved_name_rejected() {
        let mut def = PipelineDefinition::from_yaml(
            r#"
name: app
stages: [build]
compile:
  stage: build
  script: [make]
"#,
        )
        .unwrap();
        let job = def.jobs["compile"].clone();
        def.jobs.insert("stages".into(), job);

        assert!(matches!(
            PipelineValidator::compile(&def),
            Err(ConfigurationError::InvalidJob { .. })
        ));
    }
}
