//! The staged benchmark run executed inside the worker.
//!
//! Stages, each announced with one progress event on entry:
//!
//! ```text
//! LoadingDependencies -> Validating -> Preparing -> Measuring -> Completed
//! ```
//!
//! Dependency loading is skipped when the request declares none. Preparing
//! and Measuring are skipped when no snippet survives validation. Any
//! whole-run failure returns `Err` and no partial results.

use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::{MeasurementEngine, RunOptions, TimingEngine};
use crate::error::{Error, Result};
use crate::loader::DependencyLoader;
use crate::model::{BenchmarkResult, Progress, RunRequest};
use crate::postprocess::merge_report;
use crate::sandbox::{Callable, Realm, do_not_optimize};
use crate::script::Value;
use crate::validate::dry_run;

pub const LOADING_DEPENDENCIES: &str = "Loading dependencies...";
pub const VALIDATING: &str = "Validating test cases...";
pub const PREPARING: &str = "Preparing benchmark...";
pub const MEASURING: &str = "Running benchmark, please wait...";
pub const COMPLETED: &str = "Benchmark completed";

type EngineFactory = Box<dyn FnMut() -> Box<dyn MeasurementEngine>>;

/// Runs benchmark requests one at a time.
///
/// The dependency loader lives as long as the orchestrator; its cache is
/// reset at the start of every run.
pub struct Orchestrator {
    loader: DependencyLoader,
    engine: EngineFactory,
}

impl Orchestrator {
    /// Orchestrator measuring with the bundled [`TimingEngine`].
    pub fn new(config: EngineConfig) -> Self {
        Self::with_engine(move || Box::new(TimingEngine::new(config.clone())))
    }

    /// Orchestrator measuring with engines produced by `factory`, one per run.
    pub fn with_engine(factory: impl FnMut() -> Box<dyn MeasurementEngine> + 'static) -> Self {
        Self {
            loader: DependencyLoader::new(),
            engine: Box::new(factory),
        }
    }

    /// Execute one run, reporting stage transitions through `on_progress`.
    pub fn run(
        &mut self,
        request: &RunRequest,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<Vec<BenchmarkResult>> {
        let total = request.test_cases.len();
        let mut progress = |current: usize, name: &str| {
            debug!("Stage: {} ({}/{})", name, current, total);
            on_progress(Progress::new(current, total, name));
        };

        self.loader.reset();
        let realm = Realm::new();

        if !request.dependencies.is_empty() {
            progress(0, LOADING_DEPENDENCIES);
            self.loader.load(&request.dependencies, &realm)?;
        }

        progress(0, VALIDATING);
        let mut results: Vec<BenchmarkResult> = Vec::new();
        let mut valid: Vec<(&str, Callable)> = Vec::new();
        let mut seen: FxHashSet<&str> = FxHashSet::default();

        for case in &request.test_cases {
            if !seen.insert(case.name.as_str()) {
                debug!("Skipping duplicate test case name {:?}", case.name);
                continue;
            }
            match dry_run(&realm, &request.setup_code, &case.code, request.async_mode) {
                Ok(callable) => valid.push((case.name.as_str(), callable)),
                Err(e) if e.is_per_snippet() => {
                    debug!("Test case {:?} failed validation: {}", case.name, e);
                    results.push(BenchmarkResult::failed(&case.name, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        if !valid.is_empty() {
            progress(0, PREPARING);
            let mut engine = (self.engine)();
            let baseline = realm.compile("", Value::Undefined, request.async_mode, do_not_optimize())?;
            engine.set_baseline(Box::new(move || baseline.invoke()));
            for (name, callable) in valid {
                engine.register(name, Box::new(move || callable.invoke()));
            }

            progress(0, MEASURING);
            let report = engine
                .run_all(RunOptions { format: false })
                .ok_or_else(|| Error::Engine("Benchmark engine failed to produce results".to_string()))?;
            merge_report(&mut results, &report);
        }

        progress(total, COMPLETED);
        info!("Benchmark run finished with {} result(s)", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MeasurementKind, Noop, NoopStats, Report, ReportContext, Routine, Run, Stats, Trial};
    use crate::model::TestCase;

    /// Engine that calls each routine once and reports a fixed timing.
    struct FixedEngine {
        avg_ns: f64,
        routines: Vec<(String, Routine)>,
    }

    impl MeasurementEngine for FixedEngine {
        fn register(&mut self, name: &str, routine: Routine) {
            self.routines.push((name.to_string(), routine));
        }

        fn set_baseline(&mut self, _routine: Routine) {}

        fn run_all(&mut self, _options: RunOptions) -> Option<Report> {
            if self.routines.is_empty() {
                return None;
            }
            let benchmarks = self
                .routines
                .iter_mut()
                .map(|(alias, routine)| {
                    let run = match routine() {
                        Ok(()) => Run {
                            stats: Some(Stats::from_samples(&[self.avg_ns], MeasurementKind::Fn)),
                            error: None,
                        },
                        Err(e) => Run {
                            stats: None,
                            error: Some(e.to_string()),
                        },
                    };
                    Trial {
                        alias: alias.clone(),
                        runs: vec![run],
                    }
                })
                .collect();
            Some(Report {
                benchmarks,
                context: ReportContext {
                    noop: Noop {
                        function: NoopStats { avg: 1.0 },
                        iter: NoopStats { avg: 1.0 },
                    },
                },
            })
        }
    }

    fn fixed(avg_ns: f64) -> Orchestrator {
        Orchestrator::with_engine(move || {
            Box::new(FixedEngine {
                avg_ns,
                routines: Vec::new(),
            })
        })
    }

    fn request(cases: &[(&str, &str)]) -> RunRequest {
        RunRequest {
            test_cases: cases
                .iter()
                .enumerate()
                .map(|(i, (name, code))| TestCase::new(i.to_string(), *name, *code))
                .collect(),
            setup_code: "return [1, 2, 3];".to_string(),
            async_mode: false,
            dependencies: Vec::new(),
        }
    }

    fn run(orchestrator: &mut Orchestrator, request: &RunRequest) -> (Result<Vec<BenchmarkResult>>, Vec<Progress>) {
        let mut events = Vec::new();
        let result = orchestrator.run(request, &mut |p| events.push(p));
        (result, events)
    }

    #[test]
    fn test_stage_sequence() {
        let mut orchestrator = fixed(1_000.0);
        let (results, events) = run(&mut orchestrator, &request(&[("sum", "GLOBAL.reduce((a, b) => a + b, 0)")]));
        assert_eq!(results.unwrap().len(), 1);

        let labels: Vec<&str> = events.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(labels, vec![VALIDATING, PREPARING, MEASURING, COMPLETED]);
        let last = events.last().unwrap();
        assert_eq!((last.current, last.total), (1, 1));
        assert!(events.windows(2).all(|w| w[0].current <= w[1].current));
    }

    #[test]
    fn test_errors_are_per_snippet() {
        let mut orchestrator = fixed(1_000.0);
        let (results, _) = run(
            &mut orchestrator,
            &request(&[
                ("broken", "for (;;"),
                ("throws", "GLOBAL.nope()"),
                ("fine", "GLOBAL.length"),
            ]),
        );
        let results = results.unwrap();
        assert_eq!(results.len(), 3);

        let by_name = |name: &str| results.iter().find(|r| r.name == name).unwrap();
        assert!(by_name("broken").error.as_ref().unwrap().starts_with("Code compilation error: "));
        assert!(by_name("throws").error.as_ref().unwrap().starts_with("Execution error: "));
        assert_eq!(by_name("fine").ops, Some(1_000_000));
    }

    #[test]
    fn test_all_invalid_skips_measurement() {
        let mut orchestrator = fixed(1_000.0);
        let (results, events) = run(&mut orchestrator, &request(&[("a", "}"), ("b", "throw 1")]));
        let results = results.unwrap();
        assert!(results.iter().all(BenchmarkResult::is_error));
        assert_eq!(results[1].error.as_deref(), Some("Execution error: 1"));

        let labels: Vec<&str> = events.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(labels, vec![VALIDATING, COMPLETED]);
    }

    #[test]
    fn test_duplicate_names_yield_one_result() {
        let mut orchestrator = fixed(1_000.0);
        let (results, _) = run(&mut orchestrator, &request(&[("same", "1"), ("same", "2")]));
        assert_eq!(results.unwrap().len(), 1);
    }

    #[test]
    fn test_setup_failure_fails_each_snippet() {
        let mut orchestrator = fixed(1_000.0);
        let mut req = request(&[("a", "GLOBAL")]);
        req.setup_code = "return [1, 2".to_string();
        let (results, _) = run(&mut orchestrator, &req);
        let results = results.unwrap();
        assert!(results[0].error.as_ref().unwrap().starts_with("Code compilation error: "));
    }

    #[test]
    fn test_invalid_dependency_fails_whole_run() {
        let mut orchestrator = fixed(1_000.0);
        let mut req = request(&[("a", "1")]);
        req.dependencies.push(crate::model::Dependency {
            id: "d".into(),
            name: "lib".into(),
            url: "https://example.invalid/lib.js".into(),
            mode: crate::model::DependencyMode::GlobalScript,
            global_name: None,
            enabled: true,
        });
        let (results, events) = run(&mut orchestrator, &req);
        assert!(matches!(results, Err(Error::Dependency(_))));
        assert_eq!(events[0].name, LOADING_DEPENDENCIES);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_empty_engine_report_is_engine_error() {
        struct Silent;
        impl MeasurementEngine for Silent {
            fn register(&mut self, _name: &str, _routine: Routine) {}
            fn set_baseline(&mut self, _routine: Routine) {}
            fn run_all(&mut self, _options: RunOptions) -> Option<Report> {
                None
            }
        }

        let mut orchestrator = Orchestrator::with_engine(|| Box::new(Silent));
        let (results, _) = run(&mut orchestrator, &request(&[("a", "1")]));
        assert!(matches!(results, Err(Error::Engine(_))));
    }

    #[test]
    fn test_async_snippets_measured() {
        let mut orchestrator = fixed(2_000.0);
        let mut req = request(&[("awaits", "await Promise.resolve(GLOBAL.length)")]);
        req.async_mode = true;
        let (results, _) = run(&mut orchestrator, &req);
        let results = results.unwrap();
        assert_eq!(results[0].error, None);
        assert_eq!(results[0].ops, Some(500_000));
    }
}
