//! Editable benchmark suite state.
//!
//! A [`Suite`] is what a user authors: test cases, setup code, mode flag
//! and dependencies, plus the results of the last run. Any edit that changes
//! what would be measured clears the results.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{BenchmarkResult, Dependency, DependencyMode, RunRequest, TestCase};

const DEFAULT_SETUP: &str = "// Setup code runs before each test case.
// Its return value is available to every test case as `GLOBAL`.
return Array.from({ length: 1000 }, (_, i) => i);";

const FOR_LOOP: &str = "// For Loop
let sum = 0;
for (let i = 0; i < GLOBAL.length; i++) {
  sum += GLOBAL[i];
}";

const REDUCE: &str = "// Array.reduce
const sum = GLOBAL.reduce((acc, val) => acc + val, 0);";

const NEW_CASE: &str = "// Add your test code here
const result = 'Hello World';
return result;";

/// Partial update of a dependency; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct DependencyUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub mode: Option<DependencyMode>,
    pub global_name: Option<Option<String>>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Suite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub test_cases: Vec<TestCase>,
    pub setup_code: String,
    pub async_mode: bool,
    pub dependencies: Vec<Dependency>,
    pub results: Vec<BenchmarkResult>,
}

impl Default for Suite {
    fn default() -> Self {
        Self {
            title: None,
            test_cases: vec![
                TestCase::new("1", "For Loop", FOR_LOOP),
                TestCase::new("2", "Array.reduce", REDUCE),
            ],
            setup_code: DEFAULT_SETUP.to_string(),
            async_mode: false,
            dependencies: vec![Dependency {
                id: "1".to_string(),
                name: "lodash".to_string(),
                url: "https://cdn.jsdelivr.net/npm/lodash@4.17.21/+esm".to_string(),
                mode: DependencyMode::Module,
                global_name: None,
                enabled: false,
            }],
            results: Vec::new(),
        }
    }
}

impl Suite {
    /// Read a suite from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let suite: Suite = serde_json::from_str(&content)?;
        if suite.test_cases.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "{} contains no test cases",
                path.display()
            )));
        }
        Ok(suite)
    }

    /// Write the suite as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The request a run of this suite sends to the worker.
    pub fn to_request(&self) -> RunRequest {
        RunRequest {
            test_cases: self.test_cases.clone(),
            setup_code: self.setup_code.clone(),
            async_mode: self.async_mode,
            dependencies: self.dependencies.clone(),
        }
    }

    pub fn test_case(&self, id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.id == id)
    }

    /// Append a test case named "Test Case N" and return its id.
    pub fn add_test_case(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let name = format!("Test Case {}", self.test_cases.len() + 1);
        self.test_cases.push(TestCase::new(id.clone(), name, NEW_CASE));
        id
    }

    /// Remove a test case. The last remaining one cannot be removed.
    pub fn remove_test_case(&mut self, id: &str) -> Result<()> {
        if self.test_cases.len() <= 1 {
            return Err(Error::InvalidOperation(
                "cannot remove the last test case".to_string(),
            ));
        }
        let before = self.test_cases.len();
        self.test_cases.retain(|tc| tc.id != id);
        if self.test_cases.len() == before {
            return Err(Error::NotFound(format!("test case {}", id)));
        }
        self.results.clear();
        Ok(())
    }

    pub fn rename_test_case(&mut self, id: &str, name: impl Into<String>) -> Result<()> {
        self.test_case_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn update_test_case_code(&mut self, id: &str, code: impl Into<String>) -> Result<()> {
        self.test_case_mut(id)?.code = code.into();
        Ok(())
    }

    pub fn set_setup_code(&mut self, code: impl Into<String>) {
        self.setup_code = code.into();
        self.results.clear();
    }

    pub fn set_async_mode(&mut self, enabled: bool) {
        self.async_mode = enabled;
        self.results.clear();
    }

    /// Append a disabled placeholder dependency and return its id.
    pub fn add_dependency(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.dependencies.push(Dependency {
            id: id.clone(),
            name: "new-package".to_string(),
            url: String::new(),
            mode: DependencyMode::Module,
            global_name: None,
            enabled: false,
        });
        self.results.clear();
        id
    }

    pub fn update_dependency(&mut self, id: &str, update: DependencyUpdate) -> Result<()> {
        let dep = self.dependency_mut(id)?;
        if let Some(name) = update.name {
            dep.name = name;
        }
        if let Some(url) = update.url {
            dep.url = url;
        }
        if let Some(mode) = update.mode {
            dep.mode = mode;
        }
        if let Some(global_name) = update.global_name {
            dep.global_name = global_name;
        }
        if let Some(enabled) = update.enabled {
            dep.enabled = enabled;
        }
        self.results.clear();
        Ok(())
    }

    pub fn remove_dependency(&mut self, id: &str) -> Result<()> {
        let before = self.dependencies.len();
        self.dependencies.retain(|dep| dep.id != id);
        if self.dependencies.len() == before {
            return Err(Error::NotFound(format!("dependency {}", id)));
        }
        self.results.clear();
        Ok(())
    }

    /// Flip a dependency's `enabled` flag and return the new value.
    pub fn toggle_dependency(&mut self, id: &str) -> Result<bool> {
        let dep = self.dependency_mut(id)?;
        dep.enabled = !dep.enabled;
        let enabled = dep.enabled;
        self.results.clear();
        Ok(enabled)
    }

    pub fn set_results(&mut self, results: Vec<BenchmarkResult>) {
        self.results = results;
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    fn test_case_mut(&mut self, id: &str) -> Result<&mut TestCase> {
        self.test_cases
            .iter_mut()
            .find(|tc| tc.id == id)
            .ok_or_else(|| Error::NotFound(format!("test case {}", id)))
    }

    fn dependency_mut(&mut self, id: &str) -> Result<&mut Dependency> {
        self.dependencies
            .iter_mut()
            .find(|dep| dep.id == id)
            .ok_or_else(|| Error::NotFound(format!("dependency {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_results() -> Suite {
        let mut suite = Suite::default();
        suite.set_results(vec![BenchmarkResult::measured("For Loop", 1.0, 1.0, 1.0, false)]);
        suite
    }

    #[test]
    fn test_default_suite() {
        let suite = Suite::default();
        let names: Vec<&str> = suite.test_cases.iter().map(|tc| tc.name.as_str()).collect();
        assert_eq!(names, vec!["For Loop", "Array.reduce"]);
        assert!(suite.setup_code.contains("Array.from({ length: 1000 }, (_, i) => i)"));
        assert_eq!(suite.dependencies.len(), 1);
        assert!(!suite.dependencies[0].enabled);
        assert_eq!(suite.dependencies[0].mode, DependencyMode::Module);
    }

    #[test]
    fn test_add_names_by_position() {
        let mut suite = Suite::default();
        let id = suite.add_test_case();
        let added = suite.test_case(&id).unwrap();
        assert_eq!(added.name, "Test Case 3");
        assert_ne!(id, "1");
        assert_ne!(suite.add_test_case(), id);
    }

    #[test]
    fn test_last_case_cannot_be_removed() {
        let mut suite = with_results();
        suite.remove_test_case("1").unwrap();
        assert!(suite.results.is_empty());

        let err = suite.remove_test_case("2").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(suite.test_cases.len(), 1);
    }

    #[test]
    fn test_remove_unknown_case() {
        let mut suite = Suite::default();
        assert!(matches!(suite.remove_test_case("nope"), Err(Error::NotFound(_))));
        assert_eq!(suite.test_cases.len(), 2);
    }

    #[test]
    fn test_edits_that_clear_results() {
        let mut suite = with_results();
        suite.set_setup_code("return 1;");
        assert!(suite.results.is_empty());

        let mut suite = with_results();
        suite.set_async_mode(true);
        assert!(suite.results.is_empty());

        let mut suite = with_results();
        suite.toggle_dependency("1").unwrap();
        assert!(suite.results.is_empty());
        assert!(suite.dependencies[0].enabled);

        let mut suite = with_results();
        suite.add_dependency();
        assert!(suite.results.is_empty());
    }

    #[test]
    fn test_rename_keeps_results() {
        let mut suite = with_results();
        suite.rename_test_case("1", "Loop").unwrap();
        suite.update_test_case_code("1", "let x = 1;").unwrap();
        assert_eq!(suite.test_case("1").unwrap().name, "Loop");
        assert_eq!(suite.results.len(), 1);
    }

    #[test]
    fn test_update_dependency_fields() {
        let mut suite = Suite::default();
        suite
            .update_dependency(
                "1",
                DependencyUpdate {
                    mode: Some(DependencyMode::GlobalScript),
                    global_name: Some(Some("_".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        let dep = &suite.dependencies[0];
        assert_eq!(dep.mode, DependencyMode::GlobalScript);
        assert_eq!(dep.global_name(), Some("_"));
        assert_eq!(dep.name, "lodash");
    }

    #[test]
    fn test_to_request_mirrors_suite() {
        let mut suite = Suite::default();
        suite.set_async_mode(true);
        let request = suite.to_request();
        assert_eq!(request.test_cases, suite.test_cases);
        assert!(request.async_mode);
        assert_eq!(request.dependencies, suite.dependencies);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        let suite = Suite::default();
        suite.save(&path).unwrap();
        assert_eq!(Suite::load(&path).unwrap(), suite);
    }

    #[test]
    fn test_load_accepts_legacy_mode_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            r#"{
                "testCases": [{"id": "a", "name": "A", "code": "1"}],
                "dependencies": [{"id": "d", "name": "_", "url": "https://x.test/_.js",
                                  "mode": "umd", "globalName": "_", "enabled": true}]
            }"#,
        )
        .unwrap();
        let suite = Suite::load(&path).unwrap();
        assert_eq!(suite.dependencies[0].mode, DependencyMode::GlobalScript);
        assert_eq!(suite.setup_code, Suite::default().setup_code);
    }

    #[test]
    fn test_load_rejects_empty_suite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(&path, r#"{"testCases": []}"#).unwrap();
        assert!(matches!(Suite::load(&path), Err(Error::InvalidOperation(_))));
    }
}
