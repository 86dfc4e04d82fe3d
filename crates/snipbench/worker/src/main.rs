//! snipbench worker - isolated execution unit for benchmark runs.
//!
//! Speaks the framed protocol on stdin/stdout. Logs go to stderr only,
//! since stdout carries protocol frames.

use std::io::{self, BufReader, BufWriter, Write};

use snipbench_core::config::LOG_ENV;
use snipbench_core::ipc::{read_message, write_message};
use snipbench_core::sandbox::spawn_script_thread;
use snipbench_core::{EngineConfig, Error, Orchestrator, WorkerRequest, WorkerResponse};
use tracing::{debug, error, info, warn};

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let config = EngineConfig::from_env()?;
    debug!("Worker starting with {:?}", config);

    // Snippets may recurse deeply; the interpreter needs a large stack.
    let handle = spawn_script_thread("snipbench-worker", move || serve(config))?;
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("worker thread panicked"),
    }
}

/// Answer requests until stdin closes or a shutdown arrives.
fn serve(config: EngineConfig) -> snipbench_core::Result<()> {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    let mut orchestrator = Orchestrator::new(config);

    loop {
        let request = match read_message::<_, WorkerRequest>(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("Input closed, exiting");
                return Ok(());
            }
            Err(Error::Serialization(message)) => {
                warn!("Malformed request: {}", message);
                send(&mut writer, WorkerResponse::BenchmarkError { error: message })?;
                continue;
            }
            Err(e) => {
                // Framing is lost; nothing further can be read reliably.
                error!("Failed to read request: {}", e);
                send(&mut writer, WorkerResponse::BenchmarkError { error: e.to_string() })?;
                return Err(e);
            }
        };

        match request {
            WorkerRequest::RunBenchmark(request) => {
                info!("Running {} test case(s)", request.test_cases.len());
                let mut write_failure = None;
                let outcome = orchestrator.run(&request, &mut |progress| {
                    if write_failure.is_none()
                        && let Err(e) = write_message(&mut writer, &WorkerResponse::BenchmarkProgress { progress })
                    {
                        write_failure = Some(e);
                    }
                });
                if let Some(e) = write_failure {
                    return Err(e);
                }

                let response = match outcome {
                    Ok(results) => WorkerResponse::BenchmarkComplete { results },
                    Err(e) => {
                        warn!("Run failed: {}", e);
                        WorkerResponse::BenchmarkError { error: e.to_string() }
                    }
                };
                send(&mut writer, response)?;
            }
            WorkerRequest::Shutdown => {
                debug!("Shutdown requested");
                return Ok(());
            }
        }
    }
}

fn send<W: Write>(writer: &mut W, response: WorkerResponse) -> snipbench_core::Result<()> {
    write_message(writer, &response)
}
