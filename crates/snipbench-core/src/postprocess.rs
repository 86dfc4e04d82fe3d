//! Turning engine reports into public results, and ranking them.

use serde::{Deserialize, Serialize};

use crate::engine::{MeasurementKind, Report};
use crate::model::BenchmarkResult;

/// A measurement is flagged as optimized out below this multiple of the
/// matching no-op baseline.
pub const OPTIMIZED_OUT_FACTOR: f64 = 1.42;

/// Convert a report to microsecond results and merge them into `results`.
///
/// Existing error results are never replaced. A measurement for a name that
/// already holds a measurement replaces it.
pub fn merge_report(results: &mut Vec<BenchmarkResult>, report: &Report) {
    let noop = report.context.noop;

    for trial in &report.benchmarks {
        if trial.alias.is_empty() {
            continue;
        }

        let first = trial.runs.first();
        let converted = match first.and_then(|run| run.error.as_ref()) {
            Some(error) => BenchmarkResult::failed(&trial.alias, error.clone()),
            None => {
                let stats = first.and_then(|run| run.stats.as_ref());
                let kind = stats.map(|s| s.kind).unwrap_or(MeasurementKind::Fn);
                let noop_avg = noop.for_kind(kind) / 1000.0;

                let avg = stats.map_or(0.0, |s| s.avg) / 1000.0;
                let p75 = stats.map_or(0.0, |s| s.p75) / 1000.0;
                let p99 = stats.map_or(0.0, |s| s.p99) / 1000.0;
                BenchmarkResult::measured(
                    &trial.alias,
                    avg,
                    p75,
                    p99,
                    is_optimized_out(avg, noop_avg),
                )
            }
        };

        match results.iter_mut().find(|r| r.name == trial.alias) {
            Some(existing) if existing.is_error() => {}
            Some(existing) => *existing = converted,
            None => results.push(converted),
        }
    }
}

/// `avg < 1.42 * noop_avg`, both in the same unit.
pub fn is_optimized_out(avg: f64, noop_avg: f64) -> bool {
    avg < OPTIMIZED_OUT_FACTOR * noop_avg
}

/// A result with its position and speed relative to the fastest one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    /// 1-based rank among non-error results; `None` for errors.
    pub rank: Option<usize>,
    /// Percent of the fastest result's ops/s.
    pub relative: f64,
    pub result: BenchmarkResult,
}

/// `100 * ops / max_ops` over non-error results; zero for errors.
pub fn relative_performance(result: &BenchmarkResult, max_ops: u64) -> f64 {
    match result.ops {
        Some(ops) if !result.is_error() && max_ops > 0 => 100.0 * ops as f64 / max_ops as f64,
        _ => 0.0,
    }
}

/// Fastest ops/s among successful results.
pub fn max_ops(results: &[BenchmarkResult]) -> u64 {
    results
        .iter()
        .filter(|r| !r.is_error())
        .filter_map(|r| r.ops)
        .filter(|&ops| ops > 0)
        .max()
        .unwrap_or(0)
}

/// Order non-error results by descending ops/s, errors last in input order.
pub fn rank(results: &[BenchmarkResult]) -> Vec<RankedResult> {
    let best = max_ops(results);

    let mut ok: Vec<&BenchmarkResult> = results.iter().filter(|r| !r.is_error()).collect();
    ok.sort_by(|a, b| b.ops_or_zero().cmp(&a.ops_or_zero()));

    let ranked = ok.into_iter().enumerate().map(|(i, result)| RankedResult {
        rank: Some(i + 1),
        relative: relative_performance(result, best),
        result: result.clone(),
    });
    let failed = results.iter().filter(|r| r.is_error()).map(|result| RankedResult {
        rank: None,
        relative: 0.0,
        result: result.clone(),
    });

    ranked.chain(failed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Noop, NoopStats, ReportContext, Run, Stats, Trial};

    fn stats(avg_ns: f64, kind: MeasurementKind) -> Stats {
        Stats {
            avg: avg_ns,
            min: avg_ns,
            max: avg_ns,
            p75: avg_ns,
            p99: avg_ns,
            samples: 10,
            kind,
        }
    }

    fn report(trials: Vec<(&str, Run)>, fn_noop: f64, iter_noop: f64) -> Report {
        Report {
            benchmarks: trials
                .into_iter()
                .map(|(alias, run)| Trial {
                    alias: alias.to_string(),
                    runs: vec![run],
                })
                .collect(),
            context: ReportContext {
                noop: Noop {
                    function: NoopStats { avg: fn_noop },
                    iter: NoopStats { avg: iter_noop },
                },
            },
        }
    }

    fn ok(avg_ns: f64, kind: MeasurementKind) -> Run {
        Run {
            stats: Some(stats(avg_ns, kind)),
            error: None,
        }
    }

    #[test]
    fn test_units_and_ops() {
        let mut results = Vec::new();
        merge_report(
            &mut results,
            &report(vec![("a", ok(2_000.0, MeasurementKind::Fn))], 10.0, 1.0),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].avg, 2.0);
        assert_eq!(results[0].ops, Some(500_000));
        assert_eq!(results[0].optimized_out, Some(false));
    }

    #[test]
    fn test_baseline_follows_kind() {
        // 100ns per iteration: below 1.42 * 80ns (iter), far above 1.42 * 1ns (fn).
        let mut results = Vec::new();
        merge_report(
            &mut results,
            &report(
                vec![
                    ("iter", ok(100.0, MeasurementKind::Iter)),
                    ("fn", ok(100.0, MeasurementKind::Fn)),
                ],
                1.0,
                80.0,
            ),
        );
        assert_eq!(results[0].optimized_out, Some(true));
        assert_eq!(results[1].optimized_out, Some(false));
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(is_optimized_out(1.41, 1.0));
        assert!(!is_optimized_out(1.42, 1.0));
        assert!(!is_optimized_out(5.0, 1.0));
    }

    #[test]
    fn test_error_result_never_overwritten() {
        let mut results = vec![BenchmarkResult::failed("a", "Code compilation error: x")];
        merge_report(
            &mut results,
            &report(vec![("a", ok(1_000.0, MeasurementKind::Fn))], 1.0, 1.0),
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error());
    }

    #[test]
    fn test_measurement_failure_becomes_error() {
        let mut results = Vec::new();
        let failing = Run {
            stats: None,
            error: Some("Execution error: late failure".into()),
        };
        merge_report(&mut results, &report(vec![("a", failing)], 1.0, 1.0));
        assert_eq!(results[0].error.as_deref(), Some("Execution error: late failure"));
        assert_eq!(results[0].ops, None);
    }

    #[test]
    fn test_rank_and_relative() {
        let results = vec![
            BenchmarkResult::measured("slow", 4.0, 4.0, 4.0, false),
            BenchmarkResult::failed("broken", "Execution error: x"),
            BenchmarkResult::measured("fast", 1.0, 1.0, 1.0, false),
            BenchmarkResult::measured("mid", 2.0, 2.0, 2.0, false),
        ];
        let ranked = rank(&results);
        let names: Vec<&str> = ranked.iter().map(|r| r.result.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "mid", "slow", "broken"]);

        assert_eq!(ranked[0].relative, 100.0);
        assert_eq!(ranked[1].relative, 50.0);
        assert_eq!(ranked[2].relative, 25.0);
        assert_eq!(ranked[3].relative, 0.0);
        assert_eq!(ranked[3].rank, None);
        assert!(ranked.iter().all(|r| r.relative <= 100.0));
    }

    #[test]
    fn test_all_errors_rank_without_panicking() {
        let results = vec![BenchmarkResult::failed("a", "x")];
        assert_eq!(max_ops(&results), 0);
        assert_eq!(rank(&results)[0].relative, 0.0);
    }
}
