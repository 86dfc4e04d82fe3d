//! snipbench CLI - compare the speed of script snippets.

mod colors;
mod run;
mod validate;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use snipbench_core::{EngineConfig, Suite};

#[derive(Parser)]
#[command(name = "snipbench")]
#[command(about = "Benchmark script snippets against each other")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite in a worker process and print the ranking
    Run {
        /// Path to the suite (.json file)
        suite: PathBuf,

        /// Print raw results as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Store the results back into the suite file
        #[arg(long)]
        save: bool,

        /// Measurement time budget per test case, in milliseconds
        #[arg(long)]
        time_budget_ms: Option<u64>,

        /// Maximum number of samples per test case
        #[arg(long)]
        samples: Option<usize>,
    },

    /// Check syntax, setup and dependencies without measuring
    Validate {
        /// Path to the suite (.json file)
        suite: PathBuf,
    },

    /// Write the default suite to a new file
    Init {
        /// Output path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            suite,
            json,
            save,
            time_budget_ms,
            samples,
        } => {
            let engine = engine_config(time_budget_ms, samples).map_err(format_error)?;
            let args = run::RunArgs {
                suite_path: &suite,
                json,
                save,
                engine,
            };
            run::execute(args).await.map_err(format_error)?;
        }

        Commands::Validate { suite } => {
            validate::execute(&suite).map_err(format_error)?;
        }

        Commands::Init { path, force } => {
            init_suite(&path, force).map_err(format_error)?;
        }
    }

    Ok(())
}

/// Attach recovery hints to snipbench-core errors.
fn format_error(err: anyhow::Error) -> anyhow::Error {
    if let Some(core_err) = err.downcast_ref::<snipbench_core::Error>() {
        anyhow::anyhow!("{}", core_err.with_hint())
    } else {
        err
    }
}

fn engine_config(time_budget_ms: Option<u64>, samples: Option<usize>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(budget) = time_budget_ms {
        config.time_budget_ms = budget;
    }
    if let Some(samples) = samples {
        config.max_samples = samples;
    }
    Ok(config.normalized()?)
}

fn init_suite(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Suite::default().save(path)?;

    println!(
        "{}Created{} {}",
        colors::GREEN,
        colors::RESET,
        path.display()
    );
    println!(
        "Run it with: {}snipbench run {}{}",
        colors::CYAN,
        path.display(),
        colors::RESET
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_run_carries_hint() {
        let message = format_error(run::interrupted()).to_string();
        assert!(message.starts_with("Worker terminated"));
        assert!(message.contains("hint:"));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let message = format_error(anyhow::anyhow!("plain failure")).to_string();
        assert_eq!(message, "plain failure");
    }

    #[test]
    fn test_engine_overrides() {
        let config = engine_config(Some(75), Some(40)).unwrap();
        assert_eq!(config.time_budget_ms, 75);
        assert_eq!(config.max_samples, 40);
        assert!(engine_config(None, Some(0)).is_err());
    }
}
