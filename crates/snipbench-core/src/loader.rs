//! Dependency loading.
//!
//! Resources are fetched concurrently on the rayon pool, then evaluated and
//! bound one by one in declaration order. Loads are memoized by
//! [`Dependency::loader_key`] until [`DependencyLoader::reset`].

use std::path::Path;

use rayon::prelude::*;
use reqwest::Url;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Dependency, DependencyMode};
use crate::sandbox::Realm;
use crate::script::{self, Goal, JsResult, Value};
use crate::validate::validate_dependencies;

/// Loads dependency resources into a [`Realm`].
#[derive(Default)]
pub struct DependencyLoader {
    client: Option<reqwest::blocking::Client>,
    loaded: FxHashMap<String, Value>,
}

impl DependencyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every memoized load.
    pub fn reset(&mut self) {
        self.loaded.clear();
    }

    /// Number of distinct resources currently memoized.
    pub fn cached(&self) -> usize {
        self.loaded.len()
    }

    /// Fetch, evaluate and bind every active dependency.
    ///
    /// Fails with the first failing dependency in declaration order.
    /// Bindings made before the failure are left in place.
    pub fn load(&mut self, dependencies: &[Dependency], realm: &Realm) -> Result<()> {
        // Enabled entries with a blank URL are rejected here, not skipped.
        let validation = validate_dependencies(dependencies);
        if !validation.is_valid {
            return Err(Error::Dependency(validation.errors.join("; ")));
        }

        let active: Vec<&Dependency> = dependencies.iter().filter(|dep| dep.is_active()).collect();
        if active.is_empty() {
            return Ok(());
        }

        let mut pending: Vec<(String, String)> = Vec::new();
        for dep in &active {
            let key = dep.loader_key();
            if self.loaded.contains_key(&key) {
                debug!("Dependency \"{}\" already loaded as {}", dep.name, key);
            } else if !pending.iter().any(|(k, _)| *k == key) {
                pending.push((key, dep.url.trim().to_string()));
            }
        }

        let mut sources: FxHashMap<String, Result<String>> = if pending.is_empty() {
            FxHashMap::default()
        } else {
            let client = self.client()?.clone();
            debug!("Fetching {} dependency resource(s)", pending.len());
            pending
                .into_par_iter()
                .map(|(key, url)| {
                    let source = fetch_source(&client, &url);
                    (key, source)
                })
                .collect()
        };

        for dep in active {
            let key = dep.loader_key();
            let value = match self.loaded.get(&key) {
                Some(value) => value.clone(),
                None => {
                    let source = sources
                        .remove(&key)
                        .unwrap_or_else(|| Err(Error::Dependency(format!("no source fetched for {}", key))))
                        .map_err(|e| load_failure(dep, e))?;
                    let value = evaluate(dep, &source, realm).map_err(|e| load_failure(dep, e))?;
                    self.loaded.insert(key, value.clone());
                    value
                }
            };
            realm.bind(dep.name.trim(), value);
        }

        Ok(())
    }

    fn client(&mut self) -> Result<&reqwest::blocking::Client> {
        if self.client.is_none() {
            let client = reqwest::blocking::Client::builder()
                .user_agent(concat!("snipbench/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| Error::Dependency(format!("Failed to create HTTP client: {}", e)))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| Error::Dependency("HTTP client unavailable".to_string()))
    }
}

fn load_failure(dep: &Dependency, cause: Error) -> Error {
    let cause = match cause {
        Error::Dependency(message) | Error::Compile(message) | Error::Execution(message) => message,
        other => other.to_string(),
    };
    Error::Dependency(format!(
        "Failed to load {} dependency \"{}\" from {}: {}",
        dep.mode.as_str(),
        dep.name,
        dep.url,
        cause
    ))
}

/// Read a resource from disk or over HTTP.
fn fetch_source(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::Dependency(format!("invalid URL: {}", e)))?;
    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| Error::Dependency(format!("not a local path: {}", url)))?;
            read_file(&path)
        }
        "http" | "https" => {
            let response = client
                .get(parsed)
                .send()
                .and_then(|response| response.error_for_status())
                .map_err(|e| Error::Dependency(e.to_string()))?;
            response.text().map_err(|e| Error::Dependency(e.to_string()))
        }
        scheme => Err(Error::Dependency(format!("unsupported URL scheme: {}", scheme))),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Dependency(format!("cannot read {}: {}", path.display(), e)))
}

/// Evaluate a fetched resource and return the value to bind.
fn evaluate(dep: &Dependency, source: &str, realm: &Realm) -> Result<Value> {
    match dep.mode {
        DependencyMode::Module => {
            let program = script::parse(source, Goal::Module)?;
            let namespace = realm
                .with_interpreter(|interp| -> JsResult<Value> {
                    let namespace = interp.run_module(&program)?;
                    interp.run_microtasks()?;
                    Ok(namespace)
                })
                .map_err(|thrown| Error::Execution(script::thrown_message(&thrown)))?;

            // A falsy default export falls back to the namespace.
            let default = match &namespace {
                Value::Object(object) => object.borrow().get("default"),
                _ => None,
            };
            Ok(default.filter(Value::truthy).unwrap_or(namespace))
        }
        DependencyMode::GlobalScript => {
            let program = script::parse(source, Goal::Script)?;
            realm
                .with_interpreter(|interp| -> JsResult<()> {
                    interp.run_script(&program)?;
                    interp.run_microtasks()
                })
                .map_err(|thrown| Error::Execution(script::thrown_message(&thrown)))?;

            dep.global_name()
                .and_then(|global| realm.lookup(global))
                .or_else(|| realm.lookup(dep.name.trim()))
                .ok_or_else(|| {
                    Error::Dependency(format!(
                        "script did not define global \"{}\"",
                        dep.global_name().unwrap_or(&dep.name)
                    ))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    fn write_resource(dir: &tempfile::TempDir, name: &str, source: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(source.as_bytes()).unwrap();
        file_url(&path)
    }

    fn dep(name: &str, url: &str, mode: DependencyMode, global_name: Option<&str>) -> Dependency {
        Dependency {
            id: name.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            mode,
            global_name: global_name.map(str::to_string),
            enabled: true,
        }
    }

    fn call_number(realm: &Realm, expression: &str) -> f64 {
        let callable = realm
            .compile(
                &format!("globalThis.__out = {};", expression),
                Value::Undefined,
                false,
                crate::sandbox::do_not_optimize(),
            )
            .unwrap();
        callable.invoke().unwrap();
        match realm.lookup("__out") {
            Some(Value::Number(n)) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_module_default_export_bound() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(
            &dir,
            "sum.mjs",
            "export default function sum(xs) { return xs.reduce((a, b) => a + b, 0); }",
        );

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        loader
            .load(&[dep("sum", &url, DependencyMode::Module, None)], &realm)
            .unwrap();

        assert_eq!(call_number(&realm, "sum([1, 2, 3])"), 6.0);
    }

    #[test]
    fn test_module_namespace_without_default() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(&dir, "math.mjs", "export const two = 2; export function sq(x) { return x * x; }");

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        loader
            .load(&[dep("m", &url, DependencyMode::Module, None)], &realm)
            .unwrap();

        assert_eq!(call_number(&realm, "m.sq(m.two + 1)"), 9.0);
    }

    #[test]
    fn test_global_script_resolves_global_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(&dir, "lib.js", "var Lib = { triple: function (x) { return 3 * x; } };");

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        loader
            .load(&[dep("lib", &url, DependencyMode::GlobalScript, Some("Lib"))], &realm)
            .unwrap();

        assert_eq!(call_number(&realm, "lib.triple(5)"), 15.0);
        assert_eq!(call_number(&realm, "Lib.triple(2)"), 6.0);
    }

    #[test]
    fn test_global_script_falls_back_to_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(&dir, "lib.js", "globalThis.helper = { one: 1 };");

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        loader
            .load(
                &[dep("helper", &url, DependencyMode::GlobalScript, Some("NotThere"))],
                &realm,
            )
            .unwrap();
        assert_eq!(call_number(&realm, "helper.one"), 1.0);
    }

    #[test]
    fn test_same_key_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(
            &dir,
            "counter.js",
            "globalThis.loads = (globalThis.loads || 0) + 1; var Counter = {};",
        );

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let deps = [
            dep("a", &url, DependencyMode::GlobalScript, Some("Counter")),
            dep("b", &url, DependencyMode::GlobalScript, Some("Counter")),
        ];
        loader.load(&deps, &realm).unwrap();
        loader.load(&deps, &realm).unwrap();

        assert_eq!(loader.cached(), 1);
        assert_eq!(call_number(&realm, "loads"), 1.0);

        loader.reset();
        assert_eq!(loader.cached(), 0);
    }

    #[test]
    fn test_missing_file_names_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir.path().join("absent.js"));

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let err = loader
            .load(&[dep("ghost", &url, DependencyMode::Module, None)], &realm)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Dependencies loading failed: "));
        assert!(message.contains("\"ghost\""));
    }

    #[test]
    fn test_invalid_dependencies_fail_before_fetch() {
        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let err = loader
            .load(
                &[dep("x", "https://example.invalid/x.js", DependencyMode::GlobalScript, None)],
                &realm,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert!(err.to_string().contains("requires a global variable name"));
        assert!(loader.client.is_none());
    }

    #[test]
    fn test_disabled_dependencies_skipped() {
        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let mut disabled = dep("off", "https://example.invalid/off.js", DependencyMode::Module, None);
        disabled.enabled = false;
        loader.load(&[disabled], &realm).unwrap();
        assert!(realm.lookup("off").is_none());
    }

    #[test]
    fn test_module_syntax_error_is_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(&dir, "bad.mjs", "export default function (");

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let err = loader
            .load(&[dep("bad", &url, DependencyMode::Module, None)], &realm)
            .unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
    }

    #[test]
    fn test_falsy_default_export_binds_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_resource(&dir, "zero.mjs", "export const answer = 42; export default 0;");

        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        loader
            .load(&[dep("z", &url, DependencyMode::Module, None)], &realm)
            .unwrap();

        assert_eq!(call_number(&realm, "z.answer"), 42.0);
    }

    #[test]
    fn test_lone_blank_url_is_rejected() {
        let realm = Realm::new();
        let mut loader = DependencyLoader::new();
        let err = loader
            .load(&[dep("lib", "  ", DependencyMode::Module, None)], &realm)
            .unwrap_err();
        assert!(err.to_string().contains("Dependency \"lib\" is missing URL"));
    }
}
