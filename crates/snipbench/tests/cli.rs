//! End-to-end tests for snipbench CLI commands.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A suite file in a temporary directory.
struct TestSuite {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TestSuite {
    fn new(source: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("suite.json");
        fs::write(&path, source).expect("Failed to write suite");
        Self {
            _temp_dir: temp_dir,
            path,
        }
    }
}

fn snipbench() -> Command {
    let mut cmd = Command::cargo_bin("snipbench").unwrap();
    cmd.env("SNIPBENCH_WORKER_PATH", env!("CARGO_BIN_EXE_snipbench-worker"))
        .env("SNIPBENCH_TIME_BUDGET_MS", "30")
        .env("SNIPBENCH_MAX_SAMPLES", "100");
    cmd
}

fn small_suite() -> &'static str {
    r#"{
        "title": "doubling",
        "testCases": [
            {"id": "1", "name": "multiply", "code": "do_not_optimize(GLOBAL * 2)"},
            {"id": "2", "name": "add", "code": "do_not_optimize(GLOBAL + GLOBAL)"}
        ],
        "setupCode": "return 21;"
    }"#
}

// =============================================================================
// init
// =============================================================================

#[test]
fn test_init_writes_default_suite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.json");

    snipbench()
        .arg("init")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["testCases"][0]["name"], "For Loop");
    assert_eq!(json["testCases"][1]["name"], "Array.reduce");
    assert_eq!(json["dependencies"][0]["enabled"], false);
}

#[test]
fn test_init_refuses_to_overwrite() {
    let suite = TestSuite::new(small_suite());

    snipbench()
        .arg("init")
        .arg(&suite.path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    snipbench().arg("init").arg(&suite.path).arg("--force").assert().success();
}

// =============================================================================
// validate
// =============================================================================

#[test]
fn test_validate_accepts_good_suite() {
    let suite = TestSuite::new(small_suite());

    snipbench()
        .arg("validate")
        .arg(&suite.path)
        .assert()
        .success()
        .stdout(predicate::str::contains("All checks passed"));
}

#[test]
fn test_validate_reports_every_problem() {
    let suite = TestSuite::new(
        r#"{
            "testCases": [
                {"id": "1", "name": "ok", "code": "1 + 1"},
                {"id": "2", "name": "unbalanced", "code": "if (true) {"}
            ],
            "setupCode": "return [;",
            "dependencies": [
                {"id": "d", "name": "lib", "url": "ftp://example.com/lib.js", "mode": "module", "enabled": true}
            ]
        }"#,
    );

    snipbench()
        .arg("validate")
        .arg(&suite.path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unbalanced: Code compilation error"))
        .stdout(predicate::str::contains("setup: Code compilation error"))
        .stdout(predicate::str::contains("Dependency \"lib\" URL format is invalid"))
        .stderr(predicate::str::contains("3 problem(s) found"));
}

#[test]
fn test_validate_missing_file() {
    snipbench()
        .arg("validate")
        .arg("/definitely/not/here/suite.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("IO error"));
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_prints_table() {
    let suite = TestSuite::new(small_suite());

    snipbench()
        .arg("run")
        .arg(&suite.path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ops/s"))
        .stdout(predicate::str::contains("multiply"))
        .stdout(predicate::str::contains("is fastest"))
        .stderr(predicate::str::contains("Benchmark completed"));
}

#[test]
fn test_run_json_output() {
    let suite = TestSuite::new(small_suite());

    let output = snipbench()
        .arg("run")
        .arg(&suite.path)
        .arg("--json")
        .arg("--samples")
        .arg("50")
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result["ops"].as_u64().unwrap() > 0);
        assert!(result["optimizedOut"].is_boolean());
        assert!(result.get("error").is_none());
    }
}

#[test]
fn test_run_save_stores_results() {
    let suite = TestSuite::new(small_suite());

    snipbench()
        .arg("run")
        .arg(&suite.path)
        .arg("--save")
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&suite.path).unwrap()).unwrap();
    assert_eq!(json["results"].as_array().unwrap().len(), 2);
    assert_eq!(json["title"], "doubling");
}
