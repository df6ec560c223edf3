// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Runner exclusivity under load

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use pipewright::executors::ScriptedBackend;
use pipewright::pipeline::{JobStatus, PipelineStatus};
use pipewright::{Engine, EngineConfig, PipelineDefinition, Trigger};

const RUNNERS: usize = 3;

fn wide_pipeline(name: &str, jobs: usize) -> PipelineDefinition {
    let mut yaml = format!("name: {}\nstages: [test]\n", name);
    for i in 0..jobs {
        let _ = write!(yaml, "job-{i}:\n  stage: test\n  script: [run {i}]\n");
    }
    PipelineDefinition::from_yaml(&yaml).unwrap()
}

fn engine() -> (Arc<Engine>, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::new().with_default_delay(Duration::from_millis(15)));
    let config = EngineConfig {
        runner_poll_interval_ms: 5,
        ..EngineConfig::default()
    }
    .with_local_runners(RUNNERS);
    let engine = Engine::builder(config)
        .backend(backend.clone())
        .build()
        .unwrap();
    (Arc::new(engine), backend)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_jobs_than_runners() {
    let (engine, backend) = engine();
    let id = engine
        .submit(&wide_pipeline("wide", 12), Trigger::push("main", "abc"))
        .await
        .unwrap();

    let result = engine.run(id).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Success);
    assert!(result.stages[0].jobs.iter().all(|j| j.status == JobStatus::Success));
    assert!(!backend.runner_overlap());
    assert_eq!(backend.max_concurrency(), RUNNERS);

    let runs: u64 = engine.pool().list().iter().map(|r| r.jobs_run).sum();
    assert_eq!(runs, 12);
    assert_eq!(engine.pool().idle_count(), RUNNERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pipelines_share_the_pool() {
    let (engine, backend) = engine();
    let trigger = Trigger::push("main", "abc");
    let first = engine
        .submit(&wide_pipeline("first", 8), trigger.clone())
        .await
        .unwrap();
    let second = engine
        .submit(&wide_pipeline("second", 8), trigger)
        .await
        .unwrap();

    let (a, b) = tokio::join!(engine.spawn(first), engine.spawn(second));
    assert_eq!(a.unwrap().unwrap().status, PipelineStatus::Success);
    assert_eq!(b.unwrap().unwrap().status, PipelineStatus::Success);

    assert!(!backend.runner_overlap());
    assert!(backend.max_concurrency() <= RUNNERS);

    let pipelines: std::collections::HashSet<_> =
        backend.commands().iter().map(|c| c.pipeline_id).collect();
    assert_eq!(pipelines.len(), 2);
}
