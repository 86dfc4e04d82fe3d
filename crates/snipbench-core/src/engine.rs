//! Statistical measurement of registered routines.
//!
//! [`MeasurementEngine`] is the seam between the orchestrator and whatever
//! does the timing. [`TimingEngine`] is the bundled implementation:
//!
//! - warmup runs a routine until the warmup budget elapses and yields a
//!   per-call estimate
//! - routines estimated below the batch threshold are timed in batches and
//!   report per-iteration samples (`iter` kind); slower ones are timed one
//!   call per sample (`fn` kind)
//! - sampling continues until the time budget or the sample cap is hit,
//!   but never stops below the minimum sample count
//!
//! All times in a [`Report`] are nanoseconds.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;

/// A unit of work the engine can time.
pub type Routine = Box<dyn FnMut() -> Result<()>>;

/// Upper bound on calls per batch.
pub const MAX_BATCH: u64 = 1 << 20;

/// Whether samples time single calls or batches of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Fn,
    Iter,
}

/// Summary statistics of one run, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p75: f64,
    pub p99: f64,
    pub samples: usize,
    pub kind: MeasurementKind,
}

impl Stats {
    /// Summarize raw samples.
    pub fn from_samples(samples: &[f64], kind: MeasurementKind) -> Self {
        if samples.is_empty() {
            return Self {
                avg: 0.0,
                min: 0.0,
                max: 0.0,
                p75: 0.0,
                p99: 0.0,
                samples: 0,
                kind,
            };
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Self {
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p75: percentile_sorted(&sorted, 75.0),
            p99: percentile_sorted(&sorted, 99.0),
            samples: sorted.len(),
            kind,
        }
    }
}

/// Percentile of already sorted samples, linearly interpolated between ranks.
pub fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (percentile / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;
            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

/// One measurement attempt of a benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every run of one registered routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub alias: String,
    pub runs: Vec<Run>,
}

/// Average cost of an empty routine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoopStats {
    pub avg: f64,
}

/// Baselines for both measurement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Noop {
    #[serde(rename = "fn")]
    pub function: NoopStats,
    pub iter: NoopStats,
}

impl Noop {
    pub fn for_kind(&self, kind: MeasurementKind) -> f64 {
        match kind {
            MeasurementKind::Fn => self.function.avg,
            MeasurementKind::Iter => self.iter.avg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportContext {
    pub noop: Noop,
}

/// Everything one `run_all` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub benchmarks: Vec<Trial>,
    pub context: ReportContext,
}

/// Options for [`MeasurementEngine::run_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Log a human readable line per benchmark.
    pub format: bool,
}

/// A statistical measurement engine.
pub trait MeasurementEngine {
    /// Queue `routine` for measurement under `name`.
    fn register(&mut self, name: &str, routine: Routine);

    /// Replace the empty routine used for the no-op baselines.
    fn set_baseline(&mut self, routine: Routine);

    /// Measure every registered routine. `None` when nothing was registered.
    fn run_all(&mut self, options: RunOptions) -> Option<Report>;
}

/// The bundled wall-clock engine.
pub struct TimingEngine {
    config: EngineConfig,
    baseline: Routine,
    benchmarks: Vec<(String, Routine)>,
}

impl TimingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            baseline: Box::new(|| Ok(())),
            benchmarks: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Time `routine` for roughly the warmup budget and return ns per call.
    fn warmup(&self, routine: &mut Routine) -> Result<f64> {
        let budget = self.config.warmup();
        let start = Instant::now();
        let mut calls = 0u64;
        loop {
            routine()?;
            calls += 1;
            if start.elapsed() >= budget {
                break;
            }
        }
        Ok(start.elapsed().as_nanos() as f64 / calls as f64)
    }

    fn batch_size(&self, estimate_ns: f64) -> u64 {
        let per_sample_ns =
            self.config.time_budget().as_nanos() as f64 / self.config.max_samples.max(1) as f64;
        let batch = (per_sample_ns / estimate_ns.max(1.0)).floor();
        (batch as u64).clamp(2, MAX_BATCH)
    }

    fn kind_for(&self, estimate_ns: f64) -> MeasurementKind {
        if estimate_ns < self.config.batch_threshold_ns as f64 {
            MeasurementKind::Iter
        } else {
            MeasurementKind::Fn
        }
    }

    /// Warm up and sample one routine. `kind` forces a measurement kind.
    fn measure(&self, routine: &mut Routine, kind: Option<MeasurementKind>) -> Result<Stats> {
        let estimate = self.warmup(routine)?;
        let kind = kind.unwrap_or_else(|| self.kind_for(estimate));
        let batch = match kind {
            MeasurementKind::Fn => 1,
            MeasurementKind::Iter => self.batch_size(estimate),
        };

        let budget = self.config.time_budget();
        let mut samples = Vec::with_capacity(self.config.max_samples.min(4096));
        let start = Instant::now();
        loop {
            let enough = samples.len() >= self.config.max_samples;
            let out_of_time = start.elapsed() >= budget;
            if samples.len() >= self.config.min_samples && (enough || out_of_time) {
                break;
            }

            let sample_start = Instant::now();
            for _ in 0..batch {
                routine()?;
            }
            samples.push(sample_start.elapsed().as_nanos() as f64 / batch as f64);
        }

        Ok(Stats::from_samples(&samples, kind))
    }

    fn measure_baseline(&mut self) -> Noop {
        let mut baseline = std::mem::replace(&mut self.baseline, Box::new(|| Ok(())));
        let mut avg_for = |kind| match self.measure(&mut baseline, Some(kind)) {
            Ok(stats) => stats.avg,
            Err(e) => {
                debug!("No-op baseline failed, using zero: {}", e);
                0.0
            }
        };
        let noop = Noop {
            function: NoopStats {
                avg: avg_for(MeasurementKind::Fn),
            },
            iter: NoopStats {
                avg: avg_for(MeasurementKind::Iter),
            },
        };
        self.baseline = baseline;
        noop
    }
}

impl MeasurementEngine for TimingEngine {
    fn register(&mut self, name: &str, routine: Routine) {
        self.benchmarks.push((name.to_string(), routine));
    }

    fn set_baseline(&mut self, routine: Routine) {
        self.baseline = routine;
    }

    fn run_all(&mut self, options: RunOptions) -> Option<Report> {
        if self.benchmarks.is_empty() {
            return None;
        }

        let noop = self.measure_baseline();
        debug!(
            "No-op baseline: fn {:.1}ns, iter {:.1}ns",
            noop.function.avg, noop.iter.avg
        );

        let mut benchmarks = std::mem::take(&mut self.benchmarks);
        let mut trials = Vec::with_capacity(benchmarks.len());
        for (alias, routine) in benchmarks.iter_mut() {
            let run = match self.measure(routine, None) {
                Ok(stats) => {
                    if options.format {
                        info!(
                            "{:<24} avg {:>12.1}ns  p75 {:>12.1}ns  p99 {:>12.1}ns  ({:?}, {} samples)",
                            alias, stats.avg, stats.p75, stats.p99, stats.kind, stats.samples
                        );
                    }
                    Run {
                        stats: Some(stats),
                        error: None,
                    }
                }
                Err(e) => Run {
                    stats: None,
                    error: Some(e.to_string()),
                },
            };
            trials.push(Trial {
                alias: alias.clone(),
                runs: vec![run],
            });
        }

        Some(Report {
            benchmarks: trials,
            context: ReportContext { noop },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    fn quick() -> EngineConfig {
        EngineConfig {
            warmup_ms: 1,
            time_budget_ms: 5,
            min_samples: 3,
            max_samples: 50,
            batch_threshold_ns: 50_000,
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!((percentile_sorted(&sorted, 75.0) - 75.25).abs() < 1e-9);
        assert!((percentile_sorted(&sorted, 99.0) - 99.01).abs() < 1e-9);
        assert_eq!(percentile_sorted(&[42.0], 99.0), 42.0);
        assert_eq!(percentile_sorted(&[], 50.0), 0.0);
    }

    #[test]
    fn test_stats_from_unsorted_samples() {
        let stats = Stats::from_samples(&[5.0, 1.0, 3.0], MeasurementKind::Fn);
        assert_eq!(stats.avg, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.samples, 3);
    }

    #[test]
    fn test_empty_engine_has_no_report() {
        let mut engine = TimingEngine::new(quick());
        assert!(engine.run_all(RunOptions::default()).is_none());
    }

    #[test]
    fn test_fast_routine_is_batched() {
        let mut engine = TimingEngine::new(quick());
        engine.register(
            "fast",
            Box::new(|| {
                std::hint::black_box(1 + 1);
                Ok(())
            }),
        );
        let report = engine.run_all(RunOptions::default()).unwrap();
        let stats = report.benchmarks[0].runs[0].stats.clone().unwrap();
        assert_eq!(stats.kind, MeasurementKind::Iter);
        assert!(stats.samples >= 3);
        assert!(stats.p75 <= stats.p99 + f64::EPSILON);
    }

    #[test]
    fn test_slow_routine_is_per_call() {
        let mut engine = TimingEngine::new(EngineConfig {
            batch_threshold_ns: 100_000,
            ..quick()
        });
        engine.register(
            "slow",
            Box::new(|| {
                std::thread::sleep(Duration::from_micros(300));
                Ok(())
            }),
        );
        let report = engine.run_all(RunOptions::default()).unwrap();
        let stats = report.benchmarks[0].runs[0].stats.clone().unwrap();
        assert_eq!(stats.kind, MeasurementKind::Fn);
        assert!(stats.avg >= 300_000.0);
    }

    #[test]
    fn test_failing_routine_reported_per_alias() {
        let mut engine = TimingEngine::new(quick());
        let mut calls = 0;
        engine.register(
            "flaky",
            Box::new(move || {
                calls += 1;
                if calls > 5 {
                    Err(Error::Execution("gave up".into()))
                } else {
                    Ok(())
                }
            }),
        );
        engine.register("fine", Box::new(|| Ok(())));

        let report = engine.run_all(RunOptions::default()).unwrap();
        assert_eq!(report.benchmarks.len(), 2);
        assert_eq!(
            report.benchmarks[0].runs[0].error.as_deref(),
            Some("Execution error: gave up")
        );
        assert!(report.benchmarks[1].runs[0].stats.is_some());
    }

    #[test]
    fn test_report_wire_shape() {
        let report = Report {
            benchmarks: vec![],
            context: ReportContext {
                noop: Noop {
                    function: NoopStats { avg: 1.0 },
                    iter: NoopStats { avg: 0.5 },
                },
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["context"]["noop"]["fn"]["avg"], 1.0);
        assert_eq!(json["context"]["noop"]["iter"]["avg"], 0.5);
    }
}
