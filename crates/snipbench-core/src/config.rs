//! Engine and worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Overrides the worker binary location.
pub const WORKER_PATH_ENV: &str = "SNIPBENCH_WORKER_PATH";
/// Measurement time budget per benchmark, in milliseconds.
pub const TIME_BUDGET_ENV: &str = "SNIPBENCH_TIME_BUDGET_MS";
/// Upper bound on collected samples per benchmark.
pub const MAX_SAMPLES_ENV: &str = "SNIPBENCH_MAX_SAMPLES";
/// Log filter for the worker process.
pub const LOG_ENV: &str = "SNIPBENCH_LOG";

/// Worker binary file name for the current platform.
pub const WORKER_BINARY: &str = if cfg!(windows) {
    "snipbench-worker.exe"
} else {
    "snipbench-worker"
};

/// Settings for the bundled timing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// How long each callable runs before sampling starts.
    pub warmup_ms: u64,
    /// Sampling time budget per callable.
    pub time_budget_ms: u64,
    /// Samples collected even when the budget is exhausted.
    pub min_samples: usize,
    /// Sampling stops once this many samples exist.
    pub max_samples: usize,
    /// Calls estimated faster than this are measured in batches.
    pub batch_threshold_ns: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 100,
            time_budget_ms: 500,
            min_samples: 10,
            max_samples: 1000,
            batch_threshold_ns: 50_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with [`TIME_BUDGET_ENV`] and [`MAX_SAMPLES_ENV`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(budget) = env_number(TIME_BUDGET_ENV)? {
            config.time_budget_ms = budget;
        }
        if let Some(samples) = env_number(MAX_SAMPLES_ENV)? {
            config.max_samples = samples as usize;
        }
        config.normalized()
    }

    /// Clamp related fields into a consistent state.
    pub fn normalized(mut self) -> Result<Self> {
        if self.max_samples == 0 {
            return Err(Error::InvalidOperation(
                "max samples must be at least 1".to_string(),
            ));
        }
        self.min_samples = self.min_samples.clamp(1, self.max_samples);
        Ok(self)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    /// Environment variables that carry this config into a worker process.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (TIME_BUDGET_ENV, self.time_budget_ms.to_string()),
            (MAX_SAMPLES_ENV, self.max_samples.to_string()),
        ]
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::InvalidOperation(format!("{} must be a non-negative integer, got {:?}", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

/// How to start the worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Explicit worker binary; wins over every lookup.
    pub worker_path: Option<PathBuf>,
    /// Engine settings forwarded to the worker's environment.
    pub engine: EngineConfig,
    /// Log filter forwarded as [`LOG_ENV`].
    pub log_filter: Option<String>,
}

impl WorkerConfig {
    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Locate the worker binary.
    ///
    /// Looks in order at: the explicit path, [`WORKER_PATH_ENV`], the
    /// directory of the current executable, `PATH`, and finally
    /// `target/{debug,release}` relative to this crate during development.
    pub fn find_worker_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::Unavailable(format!(
                "worker binary not found at {}",
                path.display()
            )));
        }

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let worker_path = exe_dir.join(WORKER_BINARY);
            if worker_path.exists() {
                return Ok(worker_path);
            }
            // Test binaries live one level down in target/<profile>/deps.
            if let Some(profile_dir) = exe_dir.parent() {
                let worker_path = profile_dir.join(WORKER_BINARY);
                if worker_path.exists() {
                    return Ok(worker_path);
                }
            }
        }

        if let Ok(path) = which::which(WORKER_BINARY) {
            return Ok(path);
        }

        for profile in ["debug", "release"] {
            let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(WORKER_BINARY);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }

        Err(Error::Unavailable(format!(
            "could not find {}. Set {} or ensure it is in PATH",
            WORKER_BINARY, WORKER_PATH_ENV
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = EngineConfig::default().normalized().unwrap();
        assert!(config.min_samples <= config.max_samples);
        assert_eq!(config.time_budget(), Duration::from_millis(500));
    }

    #[test]
    fn test_min_samples_clamped() {
        let config = EngineConfig {
            min_samples: 50,
            max_samples: 5,
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(config.min_samples, 5);

        let zero = EngineConfig {
            max_samples: 0,
            ..Default::default()
        };
        assert!(zero.normalized().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"timeBudgetMs": 20}"#).unwrap();
        assert_eq!(config.time_budget_ms, 20);
        assert_eq!(config.max_samples, EngineConfig::default().max_samples);
    }

    #[test]
    fn test_env_round_trip_keys() {
        let config = EngineConfig {
            time_budget_ms: 42,
            max_samples: 7,
            ..Default::default()
        };
        let env = config.to_env();
        assert!(env.contains(&(TIME_BUDGET_ENV, "42".to_string())));
        assert!(env.contains(&(MAX_SAMPLES_ENV, "7".to_string())));
    }

    #[test]
    fn test_explicit_missing_path_is_unavailable() {
        let config = WorkerConfig::default().with_worker_path("/definitely/not/here/snipbench-worker");
        let err = config.find_worker_binary().unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
