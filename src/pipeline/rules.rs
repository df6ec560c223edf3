// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Job inclusion conditions
//!
//! `only`/`except` filter on the trigger ref. `rules` are evaluated in
//! order and the first match decides the job's `when`; a job with rules
//! and no match is excluded.

use regex::Regex;
use std::collections::BTreeMap;

use super::definition::{Rule, RuleCondition, When};
use super::model::JobSpec;
use crate::errors::ConfigurationError;

/// Conditions attached to a job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConditions {
    pub only: Vec<String>,
    pub except: Vec<String>,
    pub rules: Vec<Rule>,
}

impl JobConditions {
    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.except.is_empty() && self.rules.is_empty()
    }

    /// Every ref pattern the conditions use
    pub fn ref_patterns(&self) -> impl Iterator<Item = &str> {
        self.only
            .iter()
            .chain(self.except.iter())
            .map(String::as_str)
            .chain(
                self.rules
                    .iter()
                    .filter_map(|r| r.condition.as_ref())
                    .filter_map(|c| c.git_ref.as_deref()),
            )
    }
}

/// A ref pattern: literal, or a regex between slashes
#[derive(Debug)]
pub enum RefPattern {
    Exact(String),
    Regex(Regex),
}

impl RefPattern {
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        match pattern
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix('/'))
            .filter(|p| !p.is_empty())
        {
            Some(expr) => Regex::new(expr).map(Self::Regex),
            None => Ok(Self::Exact(pattern.to_string())),
        }
    }

    pub fn matches(&self, git_ref: &str) -> bool {
        match self {
            Self::Exact(name) => name == git_ref,
            Self::Regex(re) => re.is_match(git_ref),
        }
    }
}

/// Policy a job runs with for `git_ref`, or `None` if it is excluded
pub fn effective_when(
    job: &JobSpec,
    git_ref: &str,
    env: &BTreeMap<String, String>,
) -> Result<Option<When>, ConfigurationError> {
    let invalid = |pattern: &str, e: regex::Error| ConfigurationError::InvalidJob {
        job: job.name.clone(),
        reason: format!("invalid ref pattern '{}': {}", pattern, e),
    };

    let conditions = &job.conditions;

    if !conditions.only.is_empty() {
        let mut included = false;
        for pattern in &conditions.only {
            if RefPattern::parse(pattern).map_err(|e| invalid(pattern, e))?.matches(git_ref) {
                included = true;
                break;
            }
        }
        if !included {
            return Ok(None);
        }
    }

    for pattern in &conditions.except {
        if RefPattern::parse(pattern).map_err(|e| invalid(pattern, e))?.matches(git_ref) {
            return Ok(None);
        }
    }

    if conditions.rules.is_empty() {
        return Ok(Some(job.when));
    }

    for rule in &conditions.rules {
        let matched = match &rule.condition {
            Some(condition) => condition_matches(condition, git_ref, env)
                .map_err(|e| invalid(condition.git_ref.as_deref().unwrap_or_default(), e))?,
            None => true,
        };
        if matched {
            return Ok(match rule.when {
                When::Never => None,
                when => Some(when),
            });
        }
    }

    Ok(None)
}

fn condition_matches(
    condition: &RuleCondition,
    git_ref: &str,
    env: &BTreeMap<String, String>,
) -> Result<bool, regex::Error> {
    if let Some(pattern) = &condition.git_ref {
        if !RefPattern::parse(pattern)?.matches(git_ref) {
            return Ok(false);
        }
    }

    if let Some(name) = &condition.variable {
        match (env.get(name), &condition.equals) {
            (None, _) => return Ok(false),
            (Some(value), Some(expected)) if value != expected => return Ok(false),
            _ => {}
        }
    }

    Ok(true)
}
