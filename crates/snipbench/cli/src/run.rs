//! Run command implementation.
//!
//! Sends a suite to a worker process and prints the ranked results.

use std::path::Path;
use std::time::Instant;

use snipbench::{render_table, summary_line};
use snipbench_core::{EngineConfig, Error, Progress, RunManager, Suite, WorkerConfig, rank};

use crate::colors;

/// Options of `snipbench run`.
pub struct RunArgs<'a> {
    pub suite_path: &'a Path,
    pub json: bool,
    pub save: bool,
    pub engine: EngineConfig,
}

/// Run a suite file.
pub async fn execute(args: RunArgs<'_>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut suite = Suite::load(args.suite_path)?;

    let manager = RunManager::new(WorkerConfig::default().with_engine(args.engine));
    if let Some(reason) = manager.unavailable_reason() {
        return Err(Error::Unavailable(reason).into());
    }

    let title = suite
        .title
        .clone()
        .unwrap_or_else(|| args.suite_path.display().to_string());
    eprintln!(
        "{}Running{} {} ({} test cases)",
        colors::BOLD,
        colors::RESET,
        title,
        suite.test_cases.len()
    );

    let run = manager.run(suite.to_request(), print_progress);
    let results = tokio::select! {
        outcome = run => outcome?,
        _ = tokio::signal::ctrl_c() => {
            manager.terminate();
            return Err(interrupted());
        }
    };
    manager.terminate();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let ranked = rank(&results);
        println!();
        print!("{}", render_table(&ranked));
        if let Some(summary) = summary_line(&ranked) {
            println!("\n{}{}{}", colors::GREEN, summary, colors::RESET);
        }
        let failed = results.iter().filter(|r| r.is_error()).count();
        if failed > 0 {
            println!(
                "{}{} of {} test cases failed{}",
                colors::YELLOW,
                failed,
                results.len(),
                colors::RESET
            );
        }
    }

    if args.save {
        suite.set_results(results);
        suite.save(args.suite_path)?;
    }

    eprintln!(
        "{}Completed{} in {:.2}s",
        colors::GREEN,
        colors::RESET,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Error reported when Ctrl-C abandons a run.
pub fn interrupted() -> anyhow::Error {
    Error::Terminated.into()
}

fn print_progress(progress: Progress) {
    eprintln!(
        "{}[{}/{}]{} {}",
        colors::DIM,
        progress.current,
        progress.total,
        colors::RESET,
        progress.name
    );
}
