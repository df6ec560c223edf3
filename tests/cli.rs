// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Command-line behaviour

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const VALID: &str = r#"
name: demo
stages: [build, test]
variables:
  GREETING: hello
build:
  stage: build
  script:
    - mkdir -p dist
    - echo "$GREETING" > dist/out.txt
  artifacts:
    paths: [dist/]
test:
  stage: test
  needs: [build]
  script:
    - test -f dist/out.txt
    - grep -q "$GREETING" dist/out.txt
"#;

const CYCLIC: &str = r#"
name: cyclic
stages: [build]
a:
  stage: build
  script: [make a]
  needs: [b]
b:
  stage: build
  script: [make b]
  needs: [a]
"#;

const FAILING: &str = r#"
name: broken
stages: [build, deploy]
build:
  stage: build
  script: [exit 3]
ship:
  stage: deploy
  script: [echo shipping]
"#;

fn project(pipeline: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".pipewright.yml"), pipeline).unwrap();
    std::fs::write(
        dir.path().join("pipewright.toml"),
        "shell = \"sh\"\nbuilds_dir = \"builds\"\nrunner_poll_interval_ms = 5\n",
    )
    .unwrap();
    dir
}

fn pipewright(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pipewright").unwrap();
    cmd.env("NO_COLOR", "1")
        .env_remove("PIPEWRIGHT_CONFIG")
        .arg("-C")
        .arg(dir);
    cmd
}

#[test]
fn test_validate_accepts_valid_pipeline() {
    let dir = project(VALID);
    pipewright(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid!"));
}

#[test]
fn test_validate_reports_cycle() {
    let dir = project(CYCLIC);
    pipewright(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Circular dependency detected in stage 'build'"));
}

#[test]
fn test_validate_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    pipewright(dir.path())
        .args(["validate", "nope.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Pipeline file not found"));
}

#[test]
fn test_graph_formats() {
    let dir = project(VALID);
    pipewright(dir.path())
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph LR"));
    pipewright(dir.path())
        .args(["graph", "-f", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph pipeline"))
        .stdout(predicate::str::contains("\"build\" -> \"test\""));
}

#[test]
fn test_run_passes_artifacts_between_stages() {
    let dir = project(VALID);
    pipewright(dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("SUCCESS"));
}

#[test]
fn test_run_json_output() {
    let dir = project(VALID);
    let output = pipewright(dir.path())
        .args(["run", "--format", "json", "--var", "GREETING=bonjour"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "success");
    assert_eq!(result["stages"][1]["stage"], "test");
    assert_eq!(result["stages"][1]["jobs"][0]["status"], "success");
}

#[test]
fn test_run_failure_exits_non_zero() {
    let dir = project(FAILING);
    pipewright(dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("stage 'build' failed"));
}
