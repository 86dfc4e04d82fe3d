//! Round trips through a real worker process.
//!
//! These tests use the `snipbench-worker` binary built alongside them.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snipbench_core::ipc::protocol::encode_frame;
use snipbench_core::ipc::{read_message, write_message};
use snipbench_core::orchestrator::{COMPLETED, MEASURING, PREPARING, VALIDATING};
use snipbench_core::{
    EngineConfig, Error, Progress, RunManager, RunRequest, TestCase, WorkerConfig, WorkerRequest,
    WorkerResponse,
};

const WORKER: &str = env!("CARGO_BIN_EXE_snipbench-worker");

fn quick_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_path(WORKER)
        .with_engine(EngineConfig {
            time_budget_ms: 30,
            max_samples: 100,
            ..Default::default()
        })
}

fn small_request() -> RunRequest {
    RunRequest {
        test_cases: vec![
            TestCase::new("1", "double", "do_not_optimize(GLOBAL * 2)"),
            TestCase::new("2", "broken", "const = 1"),
        ],
        setup_code: "return 21;".to_string(),
        async_mode: false,
        dependencies: vec![],
    }
}

fn slow_request() -> RunRequest {
    RunRequest {
        test_cases: vec![TestCase::new(
            "1",
            "slow",
            "let s = 0; for (let i = 0; i < 20000; i++) { s += i; } do_not_optimize(s);",
        )],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_run_round_trip() {
    let manager = RunManager::new(quick_config());
    assert!(manager.is_available(), "{:?}", manager.unavailable_reason());

    let events: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let sink = events.clone();
    let results = manager
        .run(small_request(), move |p| sink.lock().unwrap().push(p))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    // Failed snippets come first.
    assert_eq!(results[0].name, "broken");
    assert!(results[0].error.as_deref().unwrap().starts_with("Code compilation error"));
    assert_eq!(results[1].name, "double");
    assert!(results[1].ops.unwrap() > 0);

    let events = events.lock().unwrap();
    let labels: Vec<&str> = events.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(labels, vec![VALIDATING, PREPARING, MEASURING, COMPLETED]);
    let last = events.last().unwrap();
    assert_eq!((last.current, last.total), (2, 2));

    assert!(!manager.is_running());
    manager.terminate();
}

#[tokio::test]
async fn test_worker_serves_consecutive_runs() {
    let manager = RunManager::new(quick_config());
    for _ in 0..2 {
        let results = manager.run(small_request(), |_| {}).await.unwrap();
        assert_eq!(results.len(), 2);
    }
    assert!(manager.is_available());
}

#[tokio::test]
async fn test_second_run_rejected_while_outstanding() {
    let manager = RunManager::new(quick_config());

    let first = manager.run(small_request(), |_| {});
    let second = manager.run(small_request(), |_| {}).await;
    assert!(matches!(second, Err(Error::RunInProgress)));

    let results = first.await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_dropped_run_future_does_not_wedge_manager() {
    let manager = RunManager::new(quick_config());

    drop(manager.run(small_request(), |_| {}));

    // The abandoned run still goes to the worker and finishes there.
    tokio::time::timeout(Duration::from_secs(30), async {
        while manager.is_running() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let results = manager.run(small_request(), |_| {}).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(manager.is_available());
}

#[tokio::test]
async fn test_whole_run_failure_is_rejected() {
    let manager = RunManager::new(quick_config());
    let request = RunRequest {
        test_cases: vec![TestCase::new("1", "a", "1")],
        dependencies: vec![snipbench_core::Dependency {
            id: "1".to_string(),
            name: "gone".to_string(),
            url: "file:///definitely/not/here/gone.mjs".to_string(),
            mode: snipbench_core::DependencyMode::Module,
            global_name: None,
            enabled: true,
        }],
        ..Default::default()
    };

    let err = manager.run(request, |_| {}).await.unwrap_err();
    match err {
        Error::Benchmark(message) => assert!(message.starts_with("Dependencies loading failed")),
        other => panic!("unexpected error: {:?}", other),
    }
    // The worker survives a failed run.
    assert!(manager.run(small_request(), |_| {}).await.is_ok());
}

#[tokio::test]
async fn test_terminate_mid_run_then_restart() {
    let manager = RunManager::new(
        WorkerConfig::default()
            .with_worker_path(WORKER)
            .with_engine(EngineConfig {
                time_budget_ms: 60_000,
                max_samples: 1_000_000,
                ..Default::default()
            }),
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let run = tokio::spawn(manager.run(slow_request(), move |p| {
        let _ = tx.send(p.name);
    }));

    loop {
        let label = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if label == MEASURING {
            break;
        }
    }

    manager.terminate();
    let outcome = run.await.unwrap();
    assert!(matches!(outcome, Err(Error::Terminated)));
    assert!(!manager.is_available());
    assert!(matches!(
        manager.run(small_request(), |_| {}).await,
        Err(Error::Unavailable(_))
    ));

    manager.restart().unwrap();
    assert!(manager.is_available());
}

#[test]
fn test_malformed_frame_answered_with_error() {
    let mut child = Command::new(WORKER)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let garbage = encode_frame(&serde_json::json!({ "type": "NOT_A_REQUEST" })).unwrap();
    stdin.write_all(&garbage).unwrap();
    stdin.flush().unwrap();

    let response: WorkerResponse = read_message(&mut stdout).unwrap().unwrap();
    assert!(matches!(response, WorkerResponse::BenchmarkError { .. }));

    write_message(&mut stdin, &WorkerRequest::Shutdown).unwrap();
    assert!(child.wait().unwrap().success());
}

#[test]
fn test_worker_exits_on_eof() {
    let mut child = Command::new(WORKER)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    drop(child.stdin.take());
    assert!(child.wait().unwrap().success());
}
