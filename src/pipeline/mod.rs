// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Pipeline definitions and run state
//!
//! A definition is parsed from YAML, compiled into an immutable
//! [`PipelineSpec`] and instantiated into a [`Pipeline`] run for a trigger.

mod dag;
mod definition;
mod model;
mod rules;
mod validation;
pub mod variables;

pub use dag::{JobGraph, PipelineGraph};
pub use definition::*;
pub use model::*;
pub use rules::{effective_when, JobConditions, RefPattern};
pub use validation::{PipelineValidator, ValidationResult, RESERVED_KEYS};
pub use variables::{Variable, Variables};
