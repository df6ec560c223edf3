// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Pipeline and job variables
//!
//! Protected variables are only exposed to pipelines running for a
//! protected ref. Masked values never reach a job log.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::definition::VariableDefinition;

/// Replacement written in place of masked values
pub const MASK: &str = "[MASKED]";

/// A resolved variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub value: String,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub protected: bool,
}

impl Variable {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            masked: false,
            protected: false,
        }
    }
}

impl From<&VariableDefinition> for Variable {
    fn from(def: &VariableDefinition) -> Self {
        Self {
            value: def.value(),
            masked: def.masked(),
            protected: def.protected(),
        }
    }
}

/// Ordered variable map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, Variable>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(defs: &BTreeMap<String, VariableDefinition>) -> Self {
        Self(defs.iter().map(|(k, v)| (k.clone(), Variable::from(v))).collect())
    }

    pub fn insert(&mut self, name: impl Into<String>, variable: Variable) {
        self.0.insert(name.into(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.0.iter()
    }

    /// Layer `other` on top of `self`; `other` wins on conflicts
    pub fn merged(&self, other: &Variables) -> Variables {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Variables(merged)
    }

    /// Values visible to a job, honoring protection
    pub fn visible(&self, protected_ref: bool) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|(_, v)| protected_ref || !v.protected)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Values that must be redacted from logs
    pub fn masked_values(&self) -> Vec<String> {
        self.0
            .values()
            .filter(|v| v.masked && !v.value.is_empty())
            .map(|v| v.value.clone())
            .collect()
    }
}

fn reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").ok()
        })
        .as_ref()
}

/// Expand `$NAME` and `${NAME}`; unknown names are left untouched
pub fn expand(text: &str, env: &BTreeMap<String, String>) -> String {
    let Some(pattern) = reference_pattern() else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            env.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Redact every masked value from `text`
pub fn mask(text: &str, masked: &[String]) -> String {
    masked
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_both_forms() {
        let env = env(&[("NAME", "app"), ("VERSION", "1.2")]);
        assert_eq!(expand("dist/$NAME-${VERSION}.tar", &env), "dist/app-1.2.tar");
        assert_eq!(expand("$UNKNOWN stays", &env), "$UNKNOWN stays");
    }

    #[test]
    fn test_protected_variables_hidden_on_unprotected_refs() {
        let mut vars = Variables::new();
        vars.insert("PUBLIC", Variable::plain("1"));
        vars.insert(
            "DEPLOY_KEY",
            Variable {
                value: "k".into(),
                masked: false,
                protected: true,
            },
        );

        assert!(!vars.visible(false).contains_key("DEPLOY_KEY"));
        assert!(vars.visible(true).contains_key("DEPLOY_KEY"));
        assert!(vars.visible(false).contains_key("PUBLIC"));
    }

    #[test]
    fn test_merge_prefers_job_values() {
        let mut global = Variables::new();
        global.insert("MODE", Variable::plain("debug"));
        global.insert("KEEP", Variable::plain("yes"));
        let mut job = Variables::new();
        job.insert("MODE", Variable::plain("release"));

        let merged = global.merged(&job);
        assert_eq!(merged.get("MODE").unwrap().value, "release");
        assert_eq!(merged.get("KEEP").unwrap().value, "yes");
    }

    #[test]
    fn test_mask_redacts_secrets() {
        let masked = vec!["hunter22".to_string()];
        assert_eq!(
            mask("login with hunter22 now", &masked),
            format!("login with {} now", MASK)
        );
    }
}
