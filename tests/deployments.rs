// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Deployments driven through the engine

use std::sync::Arc;

use pipewright::config::EnvironmentConfig;
use pipewright::deploy::{DeploymentStatus, DeploymentStrategy, RecordingTarget};
use pipewright::executors::ScriptedBackend;
use pipewright::pipeline::PipelineStatus;
use pipewright::{Engine, EngineConfig, PipelineDefinition, PipelineId, PipewrightError, Trigger};

const PIPELINE: &str = r#"
name: service
stages: [build]
build:
  stage: build
  script: [make]
  artifacts:
    paths: [dist/]
"#;

fn engine(backend: ScriptedBackend) -> (Engine, Arc<RecordingTarget>) {
    let target = Arc::new(RecordingTarget::new());
    let mut config = EngineConfig {
        runner_poll_interval_ms: 5,
        ..EngineConfig::default()
    }
    .with_local_runners(1);
    config.environments.push(EnvironmentConfig {
        name: "production".into(),
        protected: true,
    });
    let engine = Engine::builder(config)
        .backend(Arc::new(backend))
        .deployment_target(target.clone())
        .build()
        .unwrap();
    (engine, target)
}

async fn finished_pipeline(engine: &Engine) -> PipelineId {
    let definition = PipelineDefinition::from_yaml(PIPELINE).unwrap();
    let id = engine
        .submit(&definition, Trigger::push("main", "abc").protected())
        .await
        .unwrap();
    engine.run(id).await.unwrap();
    id
}

#[tokio::test]
async fn test_failed_pipeline_cannot_deploy() {
    let (engine, target) = engine(ScriptedBackend::new().fail_job("build"));
    let id = finished_pipeline(&engine).await;
    assert_eq!(engine.pipeline(id).await.unwrap().status, PipelineStatus::Failed);

    let err = engine
        .deploy(id, "production", DeploymentStrategy::BlueGreen)
        .await
        .unwrap_err();
    assert!(matches!(err, PipewrightError::DeploymentPrecondition { .. }));

    let env = engine.deployments().environment("production").unwrap();
    assert!(env.protected);
    assert_eq!(env.last_deployment_id, None);
    assert!(engine.deployments().history("production").is_empty());
    assert!(target.applied().is_empty());
}

#[tokio::test]
async fn test_deploy_carries_pipeline_artifacts() {
    let (engine, _) = engine(ScriptedBackend::new().with_output("build", "dist/app", "v1"));
    let id = finished_pipeline(&engine).await;

    let deployment = engine
        .deploy(id, "production", DeploymentStrategy::Canary)
        .await
        .unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.pipeline_id, id);
    assert_eq!(deployment.strategy, DeploymentStrategy::Canary);
    assert_eq!(deployment.artifacts.len(), 1);
    assert_eq!(deployment.artifacts[0].path, "dist/app");
    assert_eq!(
        engine
            .deployments()
            .environment("production")
            .unwrap()
            .last_deployment_id,
        Some(deployment.id)
    );
}

#[tokio::test]
async fn test_repeated_rollback_targets_same_deployment() {
    let (engine, target) = engine(ScriptedBackend::new());
    let first = finished_pipeline(&engine).await;
    let second = finished_pipeline(&engine).await;

    let good = engine
        .deploy(first, "production", DeploymentStrategy::Rolling)
        .await
        .unwrap();
    target.fail_next(1);
    let bad = engine
        .deploy(second, "production", DeploymentStrategy::Rolling)
        .await
        .unwrap();
    assert_eq!(bad.status, DeploymentStatus::Failed);

    let once = engine.rollback(bad.id).await.unwrap();
    let twice = engine.rollback(bad.id).await.unwrap();

    assert_eq!(once.rollback_to, Some(good.id));
    assert_eq!(twice.rollback_to, Some(good.id));
    assert_ne!(once.id, twice.id);
    assert_eq!(once.pipeline_id, first);
    assert_eq!(once.status, DeploymentStatus::Success);
    assert_eq!(engine.deployments().history("production").len(), 4);
    assert_eq!(
        engine
            .deployments()
            .environment("production")
            .unwrap()
            .last_deployment_id,
        Some(twice.id)
    );
}

#[tokio::test]
async fn test_rollback_needs_an_earlier_success() {
    let (engine, _) = engine(ScriptedBackend::new());
    let id = finished_pipeline(&engine).await;
    let only = engine
        .deploy(id, "staging", DeploymentStrategy::Recreate)
        .await
        .unwrap();

    assert!(!engine.deployments().environment("staging").unwrap().protected);
    assert!(matches!(
        engine.rollback(only.id).await,
        Err(PipewrightError::NoRollbackTarget { .. })
    ));
}
