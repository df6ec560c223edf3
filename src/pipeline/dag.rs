// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Job dependency graphs
//!
//! [`JobGraph`] is the DAG of one stage: nodes are the stage's jobs and
//! edges come from `needs` entries naming a job of the same stage. Entries
//! naming a job of an earlier stage are resolved before the stage starts
//! and add no edge. [`PipelineGraph`] covers the whole pipeline and is used
//! for rendering.

use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

use super::model::{PipelineSpec, StageSpec};
use crate::errors::ConfigurationError;

/// Dependency graph of the jobs in one stage
#[derive(Debug)]
pub struct JobGraph {
    stage: String,
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobGraph {
    /// Build the graph of `stages[index]`
    ///
    /// Fails on `needs` naming an unknown job or a job of a later stage, and
    /// on cycles among the stage's jobs.
    pub fn build(stages: &[StageSpec], index: usize) -> Result<Self, ConfigurationError> {
        let stage = stages.get(index).ok_or_else(|| ConfigurationError::InvalidPipeline {
            reason: format!("stage index {} out of range", index),
        })?;

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        for job in &stage.jobs {
            let node = graph.add_node(job.name.clone());
            name_to_index.insert(job.name.clone(), node);
        }

        for job in &stage.jobs {
            let job_node = name_to_index[&job.name];
            for need in &job.needs {
                if let Some(dep_node) = name_to_index.get(need) {
                    if !graph.contains_edge(*dep_node, job_node) {
                        graph.add_edge(*dep_node, job_node, ());
                    }
                    continue;
                }

                match stages.iter().position(|s| s.job(need).is_some()) {
                    Some(pos) if pos < index => {}
                    Some(pos) => {
                        return Err(ConfigurationError::ForwardDependency {
                            job: job.name.clone(),
                            dependency: need.clone(),
                            stage: stages[pos].name.clone(),
                        });
                    }
                    None => {
                        return Err(ConfigurationError::UnknownDependency {
                            job: job.name.clone(),
                            dependency: need.clone(),
                        });
                    }
                }
            }
        }

        let built = Self {
            stage: stage.name.clone(),
            graph,
            name_to_index,
        };
        built.validate_acyclic()?;
        Ok(built)
    }

    fn validate_acyclic(&self) -> Result<(), ConfigurationError> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(_) => Err(ConfigurationError::CircularDependency {
                stage: self.stage.clone(),
                jobs: self.cycle_members(),
            }),
        }
    }

    /// Jobs that sit on a cycle, sorted by name
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|n| self.graph.contains_edge(*n, *n))
            })
            .flatten()
            .map(|n| self.graph[n].clone())
            .collect();
        members.sort();
        members
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Split the stage into jobs with no same-stage dependency (eligible as
    /// soon as the stage starts) and jobs that wait on another job
    pub fn partition(&self) -> (Vec<String>, Vec<String>) {
        let mut roots = Vec::new();
        let mut waiting = Vec::new();
        for node in self.graph.node_indices() {
            let name = self.graph[node].clone();
            if self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .next()
                .is_none()
            {
                roots.push(name);
            } else {
                waiting.push(name);
            }
        }
        (roots, waiting)
    }

    /// A valid resolution order of the stage's jobs
    pub fn resolution_order(&self) -> Vec<String> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n].clone()).collect())
            .unwrap_or_default()
    }

    /// Same-stage jobs `job` waits on
    pub fn dependencies(&self, job: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(job)?;
        Some(
            self.graph
                .neighbors_directed(*node, Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
        )
    }

    /// Same-stage jobs waiting on `job`
    pub fn dependents(&self, job: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(job)?;
        Some(
            self.graph
                .neighbors_directed(*node, Direction::Outgoing)
                .map(|n| self.graph[n].clone())
                .collect(),
        )
    }

    /// Whether `a` depends directly or transitively on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(node_a), Some(node_b)) = (self.name_to_index.get(a), self.name_to_index.get(b))
        else {
            return false;
        };
        node_a != node_b && has_path_connecting(&self.graph, *node_b, *node_a, None)
    }
}

/// Whole-pipeline view used for rendering
pub struct PipelineGraph<'a> {
    spec: &'a PipelineSpec,
}

impl<'a> PipelineGraph<'a> {
    pub fn new(spec: &'a PipelineSpec) -> Self {
        Self { spec }
    }

    fn edges(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.spec
            .stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .flat_map(|j| j.needs.iter().map(move |n| (n.as_str(), j.name.as_str())))
    }

    /// Stage-by-stage execution plan
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, stage) in self.spec.stages.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, stage.name));

            let order = JobGraph::build(&self.spec.stages, i)
                .map(|g| g.resolution_order())
                .unwrap_or_else(|_| stage.jobs.iter().map(|j| j.name.clone()).collect());

            for name in order {
                let Some(job) = stage.job(&name) else {
                    continue;
                };
                out.push_str(&format!("   - {}", job.name));
                if !job.needs.is_empty() {
                    out.push_str(&format!(" [needs: {}]", job.needs.join(", ")));
                }
                if job.allow_failure {
                    out.push_str(" (allow_failure)");
                }
                out.push('\n');
            }
        }

        out
    }

    /// Graphviz DOT with one cluster per stage
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (i, stage) in self.spec.stages.iter().enumerate() {
            out.push_str(&format!("    subgraph cluster_{} {{\n", i));
            out.push_str(&format!("        label=\"{}\";\n", stage.name));
            for job in &stage.jobs {
                out.push_str(&format!("        \"{}\";\n", job.name));
            }
            out.push_str("    }\n");
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        out.push_str("}\n");
        out
    }

    /// Mermaid flowchart with one subgraph per stage
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph LR\n");

        for stage in &self.spec.stages {
            out.push_str(&format!("    subgraph {}\n", mermaid_id(&stage.name)));
            for job in &stage.jobs {
                out.push_str(&format!("        {}[{}]\n", mermaid_id(&job.name), job.name));
            }
            out.push_str("    end\n");
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    {} --> {}\n", mermaid_id(from), mermaid_id(to)));
        }

        out
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
