//! End-to-end tests for the in-process orchestrator with the timing engine.
//!
//! Runs happen on a script thread, the same way the worker runs them.

use std::io::Write;

use snipbench_core::model::{Dependency, DependencyMode, Progress};
use snipbench_core::orchestrator::{COMPLETED, LOADING_DEPENDENCIES, MEASURING, PREPARING, VALIDATING};
use snipbench_core::sandbox::spawn_script_thread;
use snipbench_core::{
    BenchmarkResult, EngineConfig, Error, Orchestrator, Result, RunRequest, Suite, TestCase, rank,
    validate_dependencies,
};

fn quick_engine() -> EngineConfig {
    EngineConfig {
        warmup_ms: 5,
        time_budget_ms: 30,
        min_samples: 5,
        max_samples: 200,
        ..Default::default()
    }
}

/// Run a request on a script thread and collect progress.
fn run(request: RunRequest) -> (Result<Vec<BenchmarkResult>>, Vec<Progress>) {
    spawn_script_thread("orchestration-test", move || {
        let mut orchestrator = Orchestrator::new(quick_engine());
        let mut events = Vec::new();
        let result = orchestrator.run(&request, &mut |p| events.push(p));
        (result, events)
    })
    .unwrap()
    .join()
    .unwrap()
}

fn file_dependency(dir: &tempfile::TempDir, file: &str, source: &str, name: &str, mode: DependencyMode) -> Dependency {
    let path = dir.path().join(file);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();
    Dependency {
        id: name.to_string(),
        name: name.to_string(),
        url: reqwest::Url::from_file_path(&path).unwrap().to_string(),
        mode,
        global_name: match mode {
            DependencyMode::GlobalScript => Some(name.to_uppercase()),
            DependencyMode::Module => None,
        },
        enabled: true,
    }
}

#[test]
fn test_loop_versus_reduce() {
    let mut suite = Suite::default();
    suite.dependencies.clear();

    let (results, events) = run(suite.to_request());
    let results = results.unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.error, None, "{} failed", result.name);
        assert!(result.ops.unwrap() > 0);
        assert!(result.avg > 0.0);
        assert!(result.p75 <= result.p99 + 1e-9);
    }

    let ranked = rank(&results);
    assert_eq!(ranked[0].relative, 100.0);
    assert!(ranked[0].result.ops >= ranked[1].result.ops);
    assert!(ranked[1].relative <= 100.0);

    let labels: Vec<&str> = events.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(labels, vec![VALIDATING, PREPARING, MEASURING, COMPLETED]);
    assert!(events.iter().all(|p| p.total == 2));
}

#[test]
fn test_one_result_per_name() {
    let request = RunRequest {
        test_cases: vec![
            TestCase::new("1", "ok", "do_not_optimize(GLOBAL * 2)"),
            TestCase::new("2", "syntax", "const = 1"),
            TestCase::new("3", "throws", "null.x"),
        ],
        setup_code: "return 21;".to_string(),
        async_mode: false,
        dependencies: vec![],
    };

    let (results, _) = run(request);
    let results = results.unwrap();
    let mut names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["ok", "syntax", "throws"]);

    for result in &results {
        match result.name.as_str() {
            "ok" => assert!(result.ops.is_some() && result.error.is_none()),
            _ => assert!(result.ops.is_none() && result.error.is_some()),
        }
    }
}

#[test]
fn test_empty_snippet_is_optimized_out() {
    let request = RunRequest {
        test_cases: vec![
            TestCase::new("1", "nothing", ""),
            TestCase::new(
                "2",
                "work",
                "let s = 0; for (let i = 0; i < 200; i++) { s += i * i; } do_not_optimize(s);",
            ),
        ],
        ..Default::default()
    };

    let (results, _) = run(request);
    let results = results.unwrap();
    let work = results.iter().find(|r| r.name == "work").unwrap();
    assert_eq!(work.optimized_out, Some(false));
    let nothing = results.iter().find(|r| r.name == "nothing").unwrap();
    assert!(nothing.optimized_out.is_some());
}

#[test]
fn test_async_mode_end_to_end() {
    let request = RunRequest {
        test_cases: vec![TestCase::new(
            "1",
            "timer",
            "const v = await new Promise((resolve) => setTimeout(() => resolve(GLOBAL), 0)); do_not_optimize(v);",
        )],
        setup_code: "return await Promise.resolve(5);".to_string(),
        async_mode: true,
        dependencies: vec![],
    };

    let (results, _) = run(request);
    let results = results.unwrap();
    assert_eq!(results[0].error, None);
    assert!(results[0].ops.unwrap() > 0);
}

#[test]
fn test_file_dependencies_visible_to_snippets() {
    let dir = tempfile::tempdir().unwrap();
    let module = file_dependency(
        &dir,
        "chunk.mjs",
        "export default function chunk(xs, n) { const out = []; for (let i = 0; i < xs.length; i += n) out.push(xs.slice(i, i + n)); return out; }",
        "chunk",
        DependencyMode::Module,
    );
    let script = file_dependency(
        &dir,
        "util.js",
        "var UTIL = { double: function (x) { return x * 2; } };",
        "util",
        DependencyMode::GlobalScript,
    );

    let request = RunRequest {
        test_cases: vec![TestCase::new(
            "1",
            "uses deps",
            "if (chunk(GLOBAL, 2).length !== 2) throw new Error('chunk'); do_not_optimize(util.double(3));",
        )],
        setup_code: "return [1, 2, 3, 4];".to_string(),
        async_mode: false,
        dependencies: vec![module, script],
    };

    let (results, events) = run(request);
    let results = results.unwrap();
    assert_eq!(results[0].error, None);
    assert_eq!(events[0].name, LOADING_DEPENDENCIES);
}

#[test]
fn test_blank_global_name_fails_before_fetch() {
    let dependency = Dependency {
        id: "1".to_string(),
        name: "lodash".to_string(),
        url: "https://unreachable.invalid/lodash.js".to_string(),
        mode: DependencyMode::GlobalScript,
        global_name: Some(String::new()),
        enabled: true,
    };

    let report = validate_dependencies(std::slice::from_ref(&dependency));
    assert!(!report.is_valid);

    let request = RunRequest {
        test_cases: vec![TestCase::new("1", "a", "1")],
        dependencies: vec![dependency],
        ..Default::default()
    };
    let (results, events) = run(request);
    assert!(matches!(results, Err(Error::Dependency(_))));
    assert_eq!(events.len(), 1);
}

#[test]
fn test_missing_dependency_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let dependency = Dependency {
        id: "1".to_string(),
        name: "gone".to_string(),
        url: reqwest::Url::from_file_path(dir.path().join("gone.mjs"))
            .unwrap()
            .to_string(),
        mode: DependencyMode::Module,
        global_name: None,
        enabled: true,
    };
    let request = RunRequest {
        test_cases: vec![TestCase::new("1", "a", "1")],
        dependencies: vec![dependency],
        ..Default::default()
    };

    let (results, _) = run(request);
    let err = results.unwrap_err();
    assert!(err.to_string().starts_with("Dependencies loading failed: "));
    assert!(err.to_string().contains("\"gone\""));
}

#[test]
fn test_enabled_blank_url_fails_run() {
    let dependency = Dependency {
        id: "1".to_string(),
        name: "lib".to_string(),
        url: "  ".to_string(),
        mode: DependencyMode::GlobalScript,
        global_name: None,
        enabled: true,
    };
    let request = RunRequest {
        test_cases: vec![TestCase::new("1", "a", "1")],
        dependencies: vec![dependency],
        ..Default::default()
    };

    let (results, events) = run(request);
    let err = results.unwrap_err();
    assert!(matches!(err, Error::Dependency(_)));
    assert!(err.to_string().contains("Dependency \"lib\" is missing URL"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, LOADING_DEPENDENCIES);
}
