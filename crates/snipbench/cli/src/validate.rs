//! Validate command implementation.
//!
//! Checks a suite without starting a worker: snippet syntax, setup syntax,
//! and the shape of every enabled dependency.

use std::path::Path;

use snipbench_core::{Suite, validate_dependencies, validate_setup, validate_syntax};

use crate::colors;

pub fn execute(suite_path: &Path) -> anyhow::Result<()> {
    let suite = Suite::load(suite_path)?;
    let mut problems = 0;

    let setup = validate_setup(&suite.setup_code, suite.async_mode);
    problems += report("setup", setup.error.as_deref());

    for test_case in &suite.test_cases {
        let result = validate_syntax(&test_case.code, suite.async_mode);
        problems += report(&test_case.name, result.error.as_deref());
    }

    let dependencies = validate_dependencies(&suite.dependencies);
    for error in &dependencies.errors {
        problems += report("dependencies", Some(error));
    }

    if problems > 0 {
        anyhow::bail!("{} problem(s) found in {}", problems, suite_path.display());
    }
    println!("{}All checks passed{}", colors::GREEN, colors::RESET);
    Ok(())
}

fn report(label: &str, error: Option<&str>) -> usize {
    match error {
        Some(error) => {
            println!("{}✗{} {}: {}", colors::RED, colors::RESET, label, error);
            1
        }
        None => {
            println!("{}✓{} {}", colors::GREEN, colors::RESET, label);
            0
        }
    }
}
