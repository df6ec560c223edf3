// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! End-to-end pipeline runs against the scripted backend

use std::sync::Arc;
use std::time::Duration;

use pipewright::executors::ScriptedBackend;
use pipewright::pipeline::{
    JobReason, JobStatus, PipelineStatus, StageStatus, TriggerKind,
};
use pipewright::{Engine, EngineConfig, PipelineDefinition, PipelineId, PipewrightError, Trigger};

fn engine(backend: ScriptedBackend, runners: usize) -> (Arc<Engine>, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend);
    let config = EngineConfig {
        runner_poll_interval_ms: 5,
        ..EngineConfig::default()
    }
    .with_local_runners(runners);
    let engine = Engine::builder(config)
        .backend(backend.clone())
        .build()
        .unwrap();
    (Arc::new(engine), backend)
}

async fn submit(engine: &Engine, yaml: &str) -> PipelineId {
    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    engine
        .submit(&definition, Trigger::push("main", "0a1b2c3"))
        .await
        .unwrap()
}

async fn wait_for_running(engine: &Engine, id: PipelineId, job: &str) {
    for _ in 0..500 {
        let pipeline = engine.pipeline(id).await.unwrap();
        if pipeline.job(job).unwrap().status == JobStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("job {} never started", job);
}

#[tokio::test]
async fn test_job_waits_for_all_needs() {
    let (engine, backend) = engine(
        ScriptedBackend::new()
            .with_delay("a", Duration::from_millis(30))
            .with_delay("b", Duration::from_millis(60)),
        3,
    );
    let id = submit(
        &engine,
        r#"
name: fan-in
stages: [test]
a:
  stage: test
  script: [run-a]
b:
  stage: test
  script: [run-b]
c:
  stage: test
  script: [run-c]
  needs: [a, b]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    assert_eq!(result.status, PipelineStatus::Success);

    let pipeline = engine.pipeline(id).await.unwrap();
    let c_started = pipeline.job("c").unwrap().started_at.unwrap();
    for dep in ["a", "b"] {
        assert!(pipeline.job(dep).unwrap().finished_at.unwrap() <= c_started);
    }

    let order: Vec<String> = backend.commands().into_iter().map(|c| c.job).collect();
    let c_at = order.iter().position(|j| j == "c").unwrap();
    assert!(order[..c_at].contains(&"a".to_string()));
    assert!(order[..c_at].contains(&"b".to_string()));
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    let (engine, backend) = engine(ScriptedBackend::new().fail_job("compile"), 2);
    let id = submit(
        &engine,
        r#"
name: skip
stages: [build]
compile:
  stage: build
  script: [make]
package:
  stage: build
  script: [tar]
  needs: [compile]
publish:
  stage: build
  script: [upload]
  needs: [package]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();

    let package = pipeline.job("package").unwrap();
    assert_eq!(package.status, JobStatus::Skipped);
    assert_eq!(
        package.reason,
        Some(JobReason::DependencyFailed {
            dependency: "compile".into()
        })
    );
    assert!(package.started_at.is_none());
    assert!(!backend.ran("package"));

    let publish = pipeline.job("publish").unwrap();
    assert_eq!(publish.status, JobStatus::Skipped);
    assert!(!backend.ran("publish"));

    assert_eq!(result.stage("build").unwrap().status, StageStatus::Failed);
    assert_eq!(result.status, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_failed_stage_halts_later_stages() {
    let (engine, backend) = engine(ScriptedBackend::new().fail_job("two-a"), 2);
    let id = submit(
        &engine,
        r#"
name: halt
stages: [one, two, three]
one-a:
  stage: one
  script: [ok]
two-a:
  stage: two
  script: [boom]
two-b:
  stage: two
  script: [ok]
three-a:
  stage: three
  script: [ok]
three-b:
  stage: three
  script: [ok]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.reason.as_deref(), Some("stage 'two' failed"));
    assert_eq!(result.stage("one").unwrap().status, StageStatus::Success);
    assert_eq!(result.stage("two").unwrap().status, StageStatus::Failed);
    assert_eq!(result.stage("three").unwrap().status, StageStatus::Skipped);

    let pipeline = engine.pipeline(id).await.unwrap();
    assert!(pipeline.stage("three").unwrap().started_at.is_none());
    for job in ["three-a", "three-b"] {
        assert!(!backend.ran(job));
        let record = pipeline.job(job).unwrap();
        assert_eq!(record.status, JobStatus::Skipped);
        assert_eq!(
            record.reason,
            Some(JobReason::UpstreamStageFailed {
                stage: "two".into()
            })
        );
    }
}

#[tokio::test]
async fn test_build_test_deploy_example() {
    let (engine, backend) = engine(ScriptedBackend::new().fail_job("build"), 2);
    let id = submit(
        &engine,
        r#"
name: webapp
stages: [build, test, deploy]
build:
  stage: build
  script: [cargo build]
unit:
  stage: test
  script: [cargo test]
integration:
  stage: test
  script: [./integration.sh]
  needs: [build]
deploy:
  stage: deploy
  script: [./deploy.sh]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();

    assert_eq!(result.job("integration").unwrap().status, JobStatus::Skipped);
    assert_eq!(result.stage("test").unwrap().status, StageStatus::Failed);
    assert_eq!(result.status, PipelineStatus::Failed);
    assert!(!backend.ran("deploy"));
    assert!(!backend.ran("integration"));
    assert_eq!(result.job("deploy").unwrap().status, JobStatus::Skipped);
}

#[tokio::test]
async fn test_retry_count_gives_three_attempts() {
    let (engine, backend) = engine(ScriptedBackend::new().failing_attempts("flaky", 2), 1);
    let id = submit(
        &engine,
        r#"
name: flaky
stages: [test]
flaky:
  stage: test
  script: [./sometimes.sh]
  retry: 2
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    let job = result.job("flaky").unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempts, 3);
    assert_eq!(backend.attempts("flaky"), 3);
    assert_eq!(result.status, PipelineStatus::Success);
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let (engine, _) = engine(
        ScriptedBackend::new().with_delay("slow", Duration::from_secs(5)),
        1,
    );
    let id = submit(
        &engine,
        r#"
name: timeout
stages: [test]
slow:
  stage: test
  script: [sleep 5]
  timeout: 50ms
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();
    assert_eq!(
        pipeline.job("slow").unwrap().reason,
        Some(JobReason::TimeoutExceeded { timeout_ms: 50 })
    );
    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(engine.pool().idle_count(), 1);
}

#[tokio::test]
async fn test_allow_failure_gives_warnings() {
    let (engine, _) = engine(ScriptedBackend::new().fail_job("lint"), 2);
    let id = submit(
        &engine,
        r#"
name: lenient
stages: [check, release]
lint:
  stage: check
  script: [clippy]
  allow_failure: true
fmt:
  stage: check
  script: [rustfmt]
release:
  stage: release
  script: [publish]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    assert_eq!(
        result.stage("check").unwrap().status,
        StageStatus::SuccessWithWarnings
    );
    assert_eq!(result.job("release").unwrap().status, JobStatus::Success);
    assert_eq!(result.status, PipelineStatus::Success);
}

#[tokio::test]
async fn test_when_policies() {
    let (engine, backend) = engine(ScriptedBackend::new().fail_job("build"), 2);
    let id = submit(
        &engine,
        r#"
name: policies
stages: [build, notify]
build:
  stage: build
  script: [make]
  allow_failure: false
cleanup:
  stage: build
  script: [rm -rf tmp]
  needs: [build]
  when: always
alert:
  stage: build
  script: [page-oncall]
  needs: [build]
  when: on_failure
approve:
  stage: build
  script: [approve]
  when: manual
"#,
    )
    .await;

    engine.run(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();

    assert_eq!(pipeline.job("cleanup").unwrap().status, JobStatus::Success);
    assert_eq!(pipeline.job("alert").unwrap().status, JobStatus::Success);
    let approve = pipeline.job("approve").unwrap();
    assert_eq!(approve.status, JobStatus::Skipped);
    assert_eq!(approve.reason, Some(JobReason::ManualActionRequired));
    assert!(!backend.ran("approve"));
}

#[tokio::test]
async fn test_unmatched_tags_fail_instead_of_waiting() {
    let (engine, _) = engine(ScriptedBackend::new(), 1);
    let id = submit(
        &engine,
        r#"
name: tags
stages: [train]
model:
  stage: train
  script: [train.py]
  tags: [gpu]
"#,
    )
    .await;

    let result = engine.run(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();
    assert_eq!(
        pipeline.job("model").unwrap().reason,
        Some(JobReason::NoMatchingRunner {
            tags: vec!["gpu".into()]
        })
    );
    assert_eq!(result.status, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_artifacts_flow_to_dependents() {
    let (engine, backend) = engine(
        ScriptedBackend::new()
            .with_output("build", "dist/app", "binary")
            .with_output("build", "target/tmp.o", "object"),
        2,
    );
    let id = submit(
        &engine,
        r#"
name: artifacts
stages: [build, test]
build:
  stage: build
  script: [make]
  artifacts:
    paths: [dist/]
    expire_in: 1 day
test:
  stage: test
  script: [./dist/app --selftest]
  needs: [build]
"#,
    )
    .await;

    engine.run(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();

    assert_eq!(pipeline.artifacts.len(), 1);
    assert_eq!(pipeline.artifacts[0].path, "dist/app");
    assert_eq!(pipeline.job("build").unwrap().artifacts.len(), 1);

    let restored = backend.restored("test");
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].content, b"binary".to_vec());
    assert!(!engine.artifacts().is_pinned(id));
}

#[tokio::test]
async fn test_conditions_exclude_jobs_for_ref() {
    let (engine, _) = engine(ScriptedBackend::new(), 1);
    let definition = PipelineDefinition::from_yaml(
        r#"
name: refs
stages: [test, release]
test:
  stage: test
  script: [cargo test]
publish:
  stage: release
  script: [cargo publish]
  only: [main, /^release/.*$/]
"#,
    )
    .unwrap();

    let feature = engine
        .submit(&definition, Trigger::push("feature/login", "abc"))
        .await
        .unwrap();
    let pipeline = engine.pipeline(feature).await.unwrap();
    assert!(pipeline.job("publish").is_none());
    assert!(pipeline.stage("release").is_none());

    let release = engine
        .submit(&definition, Trigger::push("release/1.2", "abc"))
        .await
        .unwrap();
    assert!(engine.pipeline(release).await.unwrap().job("publish").is_some());
}

#[tokio::test]
async fn test_masked_variables_are_redacted() {
    let (engine, backend) = engine(ScriptedBackend::new(), 1);
    let id = submit(
        &engine,
        r#"
name: secrets
stages: [deploy]
variables:
  API_TOKEN:
    value: tok-123456
    masked: true
push:
  stage: deploy
  script:
    - 'curl -H "Authorization: $API_TOKEN" https://example.test'
"#,
    )
    .await;

    engine.run(id).await.unwrap();

    assert!(backend.commands_for("push")[0].contains("tok-123456"));
    let log = engine.job_log(id, "push").await.unwrap();
    assert!(log.iter().any(|e| e.message.contains("[MASKED]")));
    assert!(log.iter().all(|e| !e.message.contains("tok-123456")));
}

#[tokio::test]
async fn test_retry_creates_independent_pipeline() {
    let (engine, _) = engine(ScriptedBackend::new(), 1);
    let id = submit(
        &engine,
        r#"
name: retry
stages: [build]
build:
  stage: build
  script: [make]
"#,
    )
    .await;

    assert!(matches!(
        engine.retry(id).await,
        Err(PipewrightError::InvalidTransition { .. })
    ));

    engine.run(id).await.unwrap();
    let retried = engine.retry(id).await.unwrap();
    assert_ne!(retried, id);

    let original = engine.pipeline(id).await.unwrap();
    let copy = engine.pipeline(retried).await.unwrap();
    assert!(Arc::ptr_eq(&original.spec, &copy.spec));
    assert_eq!(copy.status, PipelineStatus::Pending);
    assert_eq!(copy.retried_from, Some(id));
    assert_eq!(copy.trigger.kind, TriggerKind::Retry);
    assert_ne!(copy.job("build").unwrap().id, original.job("build").unwrap().id);
    assert_eq!(copy.job("build").unwrap().attempts, 0);

    engine.run(retried).await.unwrap();
    let after = engine.pipeline(id).await.unwrap();
    assert_eq!(after.finished_at, original.finished_at);
    assert_eq!(engine.history().await.len(), 2);
}

#[tokio::test]
async fn test_cancel_running_pipeline() {
    let (engine, backend) = engine(
        ScriptedBackend::new().with_delay("long", Duration::from_secs(30)),
        2,
    );
    let id = submit(
        &engine,
        r#"
name: cancel
stages: [build, deploy]
long:
  stage: build
  script: [sleep 30]
after:
  stage: build
  script: [echo]
  needs: [long]
ship:
  stage: deploy
  script: [ship]
"#,
    )
    .await;

    let handle = engine.spawn(id);
    wait_for_running(&engine, id, "long").await;
    engine.cancel(id).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Canceled);
    assert_eq!(result.stage("build").unwrap().status, StageStatus::Canceled);
    assert_eq!(result.stage("deploy").unwrap().status, StageStatus::Canceled);
    for job in ["long", "after", "ship"] {
        assert_eq!(result.job(job).unwrap().status, JobStatus::Canceled);
    }
    assert!(!backend.ran("ship"));
    assert_eq!(engine.pool().idle_count(), 2);

    assert!(matches!(
        engine.cancel(id).await,
        Err(PipewrightError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_cancel_pending_pipeline() {
    let (engine, backend) = engine(ScriptedBackend::new(), 1);
    let id = submit(
        &engine,
        "name: idle\nstages: [build]\nbuild:\n  stage: build\n  script: [make]\n",
    )
    .await;

    engine.cancel(id).await.unwrap();
    let pipeline = engine.pipeline(id).await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Canceled);
    assert_eq!(pipeline.job("build").unwrap().status, JobStatus::Canceled);

    assert!(matches!(
        engine.run(id).await,
        Err(PipewrightError::InvalidTransition { .. })
    ));
    assert!(backend.commands().is_empty());
}

#[tokio::test]
async fn test_unknown_pipeline() {
    let (engine, _) = engine(ScriptedBackend::new(), 1);
    assert!(matches!(
        engine.run(PipelineId::new()).await,
        Err(PipewrightError::PipelineNotFound { .. })
    ));
    assert!(matches!(
        engine.job_log(PipelineId::new(), "x").await,
        Err(PipewrightError::PipelineNotFound { .. })
    ));
}
