//! Authoring-time validation of snippets, setup code and dependencies.
//!
//! Nothing in here measures anything. [`validate_syntax`] and
//! [`validate_setup`] only parse; [`validate_with_dry_run`] also invokes the
//! snippet once; [`validate_dependencies`] is purely structural.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{Dependency, DependencyMode};
use crate::sandbox::{Realm, do_not_optimize};
use crate::script::{self, Goal};

/// URL schemes the dependency loader knows how to fetch.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// Outcome of validating one piece of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }

    fn from_result<T>(result: crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self::valid(),
            Err(e) => Self::invalid(e.to_string()),
        }
    }
}

/// Outcome of structural dependency validation, listing every violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Compile a snippet without running it.
pub fn validate_syntax(code: &str, is_async: bool) -> ValidationResult {
    ValidationResult::from_result(
        script::parse(code, Goal::FunctionBody { is_async }).map_err(Error::from),
    )
}

/// Compile setup source without running it.
pub fn validate_setup(setup_code: &str, is_async: bool) -> ValidationResult {
    if setup_code.trim().is_empty() {
        return ValidationResult::valid();
    }
    validate_syntax(setup_code, is_async)
}

/// Evaluate setup once, compile `code` against its value and invoke it once.
///
/// Runs in a fresh realm with no dependencies bound.
pub fn validate_with_dry_run(setup_code: &str, code: &str, is_async: bool) -> ValidationResult {
    validate_in_realm(&Realm::new(), setup_code, code, is_async)
}

/// [`validate_with_dry_run`] against an existing realm, e.g. one with
/// dependencies already loaded.
pub fn validate_in_realm(realm: &Realm, setup_code: &str, code: &str, is_async: bool) -> ValidationResult {
    ValidationResult::from_result(dry_run(realm, setup_code, code, is_async))
}

pub(crate) fn dry_run(
    realm: &Realm,
    setup_code: &str,
    code: &str,
    is_async: bool,
) -> crate::Result<crate::sandbox::Callable> {
    let global = realm.evaluate_setup(setup_code, is_async)?;
    let callable = realm.compile(code, global, is_async, do_not_optimize())?;
    callable.invoke()?;
    Ok(callable)
}

/// Check every enabled dependency for the fields a load needs.
pub fn validate_dependencies(dependencies: &[Dependency]) -> DependencyValidation {
    let mut errors = Vec::new();

    for dep in dependencies.iter().filter(|dep| dep.enabled) {
        let name = dep.name.trim();
        if name.is_empty() {
            errors.push("Dependency name is missing".to_string());
        }
        let label = if name.is_empty() { dep.id.as_str() } else { name };

        let url = dep.url.trim();
        if url.is_empty() {
            errors.push(format!("Dependency \"{}\" is missing URL", label));
        } else if !is_supported_url(url) {
            errors.push(format!("Dependency \"{}\" URL format is invalid", label));
        }

        if dep.mode == DependencyMode::GlobalScript && dep.global_name().is_none() {
            errors.push(format!(
                "Dependency \"{}\" in global-script mode requires a global variable name",
                label
            ));
        }
    }

    DependencyValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn is_supported_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| SUPPORTED_SCHEMES.contains(&parsed.scheme()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dependency(name: &str, url: &str, mode: DependencyMode, global_name: Option<&str>) -> Dependency {
        Dependency {
            id: format!("dep-{}", name),
            name: name.to_string(),
            url: url.to_string(),
            mode,
            global_name: global_name.map(str::to_string),
            enabled: true,
        }
    }

    #[test]
    fn test_syntax_only_never_runs() {
        let result = validate_syntax("throw new Error('not reached')", false);
        assert!(result.is_valid);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_syntax_error_reported() {
        let result = validate_syntax("let = ;", false);
        assert!(!result.is_valid);
        assert!(result.error.unwrap().starts_with("Code compilation error: "));
    }

    #[test]
    fn test_await_depends_on_mode() {
        assert!(!validate_syntax("await null;", false).is_valid);
        assert!(validate_syntax("await null;", true).is_valid);
    }

    #[test]
    fn test_blank_setup_is_valid() {
        assert!(validate_setup("", false).is_valid);
        assert!(!validate_setup("return [1, 2", false).is_valid);
    }

    #[test]
    fn test_dry_run_surfaces_execution_errors() {
        let result = validate_with_dry_run("return { n: 1 };", "GLOBAL.missing.field", false);
        assert!(!result.is_valid);
        assert!(result.error.unwrap().starts_with("Execution error: "));

        let ok = validate_with_dry_run("return { n: 1 };", "do_not_optimize(GLOBAL.n + 1)", false);
        assert_eq!(ok, ValidationResult::valid());
    }

    #[test]
    fn test_dry_run_reports_setup_failure() {
        let result = validate_with_dry_run("throw new Error('setup broke')", "1 + 1", false);
        assert_eq!(result.error.as_deref(), Some("Execution error: setup broke"));
    }

    #[test]
    fn test_global_script_requires_global_name() {
        let deps = [dependency(
            "lodash",
            "https://cdn.example.com/lodash.js",
            DependencyMode::GlobalScript,
            Some("  "),
        )];
        let report = validate_dependencies(&deps);
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            vec!["Dependency \"lodash\" in global-script mode requires a global variable name"]
        );
    }

    #[test]
    fn test_every_violation_listed() {
        let deps = [
            dependency("", "https://example.com/a.js", DependencyMode::Module, None),
            dependency("b", "", DependencyMode::Module, None),
            dependency("c", "not a url", DependencyMode::Module, None),
            dependency("d", "ftp://example.com/d.js", DependencyMode::Module, None),
        ];
        let report = validate_dependencies(&deps);
        assert_eq!(
            report.errors,
            vec![
                "Dependency name is missing".to_string(),
                "Dependency \"b\" is missing URL".to_string(),
                "Dependency \"c\" URL format is invalid".to_string(),
                "Dependency \"d\" URL format is invalid".to_string(),
            ]
        );
    }

    #[test]
    fn test_disabled_dependencies_ignored() {
        let mut dep = dependency("x", "", DependencyMode::GlobalScript, None);
        dep.enabled = false;
        let report = validate_dependencies(&[dep]);
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_file_urls_accepted() {
        let deps = [dependency("local", "file:///tmp/lib.mjs", DependencyMode::Module, None)];
        assert!(validate_dependencies(&deps).is_valid);
    }
}
