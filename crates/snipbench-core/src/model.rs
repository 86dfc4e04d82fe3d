//! Data model shared by the host, the worker and the wire protocol.
//!
//! Field names serialize in camelCase so suite files and protocol frames
//! keep the shape the front end uses.

use serde::{Deserialize, Serialize};

/// A single benchmark snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable unique identifier.
    pub id: String,
    /// Display label. Not required to be unique.
    pub name: String,
    /// Snippet source text.
    pub code: String,
}

impl TestCase {
    /// Create a test case.
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            code: code.into(),
        }
    }
}

/// How a dependency resource is evaluated and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyMode {
    /// Evaluated as a module; its default export (or namespace) is bound.
    #[serde(rename = "module", alias = "esm")]
    Module,
    /// Evaluated as a classic script that publishes a global.
    #[serde(rename = "global-script", alias = "umd")]
    GlobalScript,
}

impl DependencyMode {
    /// Wire name, also used as the loader cache key prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyMode::Module => "module",
            DependencyMode::GlobalScript => "global-script",
        }
    }
}

/// An external code resource made visible to every snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub id: String,
    /// Binding identifier visible to snippets.
    pub name: String,
    /// Resource locator (`file://`, `http://` or `https://`).
    pub url: String,
    pub mode: DependencyMode,
    /// Global published by a global-script resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    pub enabled: bool,
}

impl Dependency {
    /// Memoization key for the dependency loader.
    pub fn loader_key(&self) -> String {
        format!("{}:{}", self.mode.as_str(), self.url)
    }

    /// Whether this dependency takes part in a run.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.url.trim().is_empty()
    }

    /// The configured global name, if it is not blank.
    pub fn global_name(&self) -> Option<&str> {
        self.global_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Public per-snippet outcome of a run.
///
/// A result either carries an `error` or a measurement (`ops` and
/// `optimized_out` set), never both. Times are in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub name: String,
    pub avg: f64,
    pub p99: f64,
    pub p75: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_out: Option<bool>,
}

impl BenchmarkResult {
    /// Result for a snippet that failed to compile, dry-run or measure.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avg: 0.0,
            p99: 0.0,
            p75: 0.0,
            ops: None,
            error: Some(error.into()),
            optimized_out: None,
        }
    }

    /// Result for a measured snippet. Times are in microseconds.
    pub fn measured(name: impl Into<String>, avg: f64, p75: f64, p99: f64, optimized_out: bool) -> Self {
        Self {
            name: name.into(),
            avg,
            p99,
            p75,
            ops: Some(ops_per_second(avg)),
            error: None,
            optimized_out: Some(optimized_out),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Operations per second, zero for errored results.
    pub fn ops_or_zero(&self) -> u64 {
        self.ops.unwrap_or(0)
    }
}

/// `round(1_000_000 / avg_us)`, saturating for degenerate averages.
pub fn ops_per_second(avg_us: f64) -> u64 {
    if avg_us <= 0.0 || !avg_us.is_finite() {
        return u64::MAX;
    }
    let ops = (1_000_000.0 / avg_us).round();
    if ops >= u64::MAX as f64 { u64::MAX } else { ops as u64 }
}

/// Stage progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    /// Human readable stage label.
    pub name: String,
}

impl Progress {
    pub fn new(current: usize, total: usize, name: impl Into<String>) -> Self {
        Self {
            current,
            total,
            name: name.into(),
        }
    }
}

/// Everything the worker needs to perform one run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub setup_code: String,
    #[serde(default)]
    pub async_mode: bool,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_rounding() {
        assert_eq!(ops_per_second(1.0), 1_000_000);
        assert_eq!(ops_per_second(3.0), 333_333);
        assert_eq!(ops_per_second(0.3), 3_333_333);
        assert_eq!(ops_per_second(2_000_000.0), 1);
        assert_eq!(ops_per_second(0.0), u64::MAX);
    }

    #[test]
    fn test_failed_result_has_no_ops() {
        let result = BenchmarkResult::failed("a", "Execution error: boom");
        assert!(result.is_error());
        assert_eq!(result.ops, None);
        assert_eq!(result.optimized_out, None);
        assert_eq!(result.ops_or_zero(), 0);
    }

    #[test]
    fn test_dependency_mode_accepts_legacy_names() {
        let esm: DependencyMode = serde_json::from_str("\"esm\"").unwrap();
        let umd: DependencyMode = serde_json::from_str("\"umd\"").unwrap();
        assert_eq!(esm, DependencyMode::Module);
        assert_eq!(umd, DependencyMode::GlobalScript);
        assert_eq!(
            serde_json::to_string(&DependencyMode::GlobalScript).unwrap(),
            "\"global-script\""
        );
    }

    #[test]
    fn test_dependency_helpers() {
        let dep = Dependency {
            id: "1".into(),
            name: "lodash".into(),
            url: "https://cdn.example.com/lodash.js".into(),
            mode: DependencyMode::GlobalScript,
            global_name: Some("  ".into()),
            enabled: true,
        };
        assert_eq!(dep.loader_key(), "global-script:https://cdn.example.com/lodash.js");
        assert!(dep.is_active());
        assert_eq!(dep.global_name(), None);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = BenchmarkResult::measured("loop", 2.0, 2.5, 4.0, true);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["optimizedOut"], true);
        assert_eq!(json["ops"], 500_000);
        assert!(json.get("error").is_none());
    }
}
