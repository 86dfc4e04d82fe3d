//! Host-side lifecycle of the worker process.
//!
//! [`RunManager`] owns one worker at a time. Requests go out over the
//! worker's stdin; a reader task routes frames from its stdout back to the
//! single outstanding run. At most one run is outstanding: a second `run()`
//! is rejected, never queued.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{LOG_ENV, WorkerConfig};
use crate::error::{Error, Result};
use crate::model::{BenchmarkResult, Progress, RunRequest};

use super::protocol::{WorkerRequest, WorkerResponse, read_message_async, write_message_async};

/// Callback receiving progress events of the outstanding run.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

type Reply = oneshot::Sender<Result<Vec<BenchmarkResult>>>;

/// The outstanding run.
struct Pending {
    reply: Reply,
    on_progress: ProgressCallback,
}

/// Handle to a live worker process.
struct WorkerHandle {
    child: Child,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    reader: JoinHandle<()>,
    generation: u64,
}

impl WorkerHandle {
    /// Kill the process immediately. The runtime reaps it.
    fn kill(mut self) {
        self.reader.abort();
        if let Err(e) = self.child.start_kill() {
            // InvalidInput means the process already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill worker: {}", e);
            }
        }
    }
}

#[derive(Default)]
struct ManagerState {
    worker: Option<WorkerHandle>,
    pending: Option<Pending>,
    generation: u64,
    /// Why the manager is unavailable, if it is.
    unavailable: Option<String>,
}

impl ManagerState {
    fn owns(&self, generation: u64) -> bool {
        self.worker.as_ref().is_some_and(|w| w.generation == generation)
    }
}

/// Runs benchmark requests in an isolated worker process.
#[derive(Clone)]
pub struct RunManager {
    config: WorkerConfig,
    state: Arc<Mutex<ManagerState>>,
}

impl RunManager {
    /// Create a manager and start its worker.
    ///
    /// Never fails: if the worker cannot be started the manager reports
    /// itself unavailable and [`RunManager::run`] rejects.
    pub fn new(config: WorkerConfig) -> Self {
        let manager = Self {
            config,
            state: Arc::new(Mutex::new(ManagerState::default())),
        };
        if let Err(e) = manager.start_worker() {
            warn!("Worker unavailable: {}", e);
        }
        manager
    }

    /// Whether a worker is running and able to accept a run.
    pub fn is_available(&self) -> bool {
        let mut state = lock(&self.state);
        match state.worker.as_mut() {
            Some(worker) => matches!(worker.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Reason the manager is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<String> {
        lock(&self.state).unavailable.clone()
    }

    /// Whether a run is outstanding.
    pub fn is_running(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Start a run.
    ///
    /// Rejections for an unavailable worker or an outstanding run happen
    /// before anything is sent; the returned future is already resolved.
    /// Otherwise the request is sent right away, and the run stays
    /// outstanding until the worker answers even if the returned future is
    /// dropped.
    pub fn run(
        &self,
        request: RunRequest,
        on_progress: impl Fn(Progress) + Send + Sync + 'static,
    ) -> BoxFuture<'static, Result<Vec<BenchmarkResult>>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                return futures::future::ready(Err(Error::Unavailable(format!("no async runtime: {}", e))))
                    .boxed();
            }
        };

        let (stdin, generation, reply) = {
            let mut state = lock(&self.state);
            let Some(worker) = state.worker.as_ref() else {
                let reason = state
                    .unavailable
                    .clone()
                    .unwrap_or_else(|| "worker is not running".to_string());
                return futures::future::ready(Err(Error::Unavailable(reason))).boxed();
            };
            if state.pending.is_some() {
                return futures::future::ready(Err(Error::RunInProgress)).boxed();
            }

            let stdin = worker.stdin.clone();
            let generation = worker.generation;
            let (tx, rx) = oneshot::channel();
            state.pending = Some(Pending {
                reply: tx,
                on_progress: Arc::new(on_progress),
            });
            (stdin, generation, rx)
        };

        let state = self.state.clone();
        runtime.spawn(async move {
            debug!(
                "Sending {} test case(s) to worker",
                request.test_cases.len()
            );
            let message = WorkerRequest::RunBenchmark(request);
            let sent = {
                let mut stdin = stdin.lock().await;
                write_message_async(&mut *stdin, &message).await
            };
            if let Err(e) = sent {
                reject_pending(&state, generation, e);
            }
        });

        async move { reply.await.unwrap_or(Err(Error::Terminated)) }.boxed()
    }

    /// Kill the worker and reject the outstanding run, if any.
    ///
    /// The manager stays unavailable until [`RunManager::restart`].
    pub fn terminate(&self) {
        let (worker, pending) = {
            let mut state = lock(&self.state);
            state.unavailable = Some("worker terminated".to_string());
            (state.worker.take(), state.pending.take())
        };
        if let Some(worker) = worker {
            info!("Terminating worker");
            worker.kill();
        }
        if let Some(pending) = pending {
            let _ = pending.reply.send(Err(Error::Terminated));
        }
    }

    /// Replace the worker with a fresh one.
    pub fn restart(&self) -> Result<()> {
        self.terminate();
        self.start_worker()
    }

    fn start_worker(&self) -> Result<()> {
        let result = self.spawn_worker();
        let mut state = lock(&self.state);
        match result {
            Ok(worker) => {
                state.generation = worker.generation;
                state.worker = Some(worker);
                state.unavailable = None;
                Ok(())
            }
            Err(e) => {
                state.unavailable = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn spawn_worker(&self) -> Result<WorkerHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Unavailable(format!("no async runtime: {}", e)))?;
        let worker_path = self.config.find_worker_binary()?;

        let mut command = Command::new(&worker_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker logs pass through
            .kill_on_drop(true);
        for (key, value) in self.config.engine.to_env() {
            command.env(key, value);
        }
        if let Some(filter) = &self.config.log_filter {
            command.env(LOG_ENV, filter);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Unavailable(format!(
                "Failed to spawn worker process '{}': {}",
                worker_path.display(),
                e
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Unavailable("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Unavailable("Failed to get worker stdout".to_string()))?;

        let generation = lock(&self.state).generation + 1;
        let reader = runtime.spawn(read_loop(Arc::downgrade(&self.state), stdout, generation));
        debug!("Started worker {} (generation {})", worker_path.display(), generation);

        Ok(WorkerHandle {
            child,
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            reader,
            generation,
        })
    }
}

fn lock(state: &Mutex<ManagerState>) -> MutexGuard<'_, ManagerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Route worker frames to the outstanding run until the stream ends.
async fn read_loop(state: Weak<Mutex<ManagerState>>, stdout: ChildStdout, generation: u64) {
    let mut reader = BufReader::new(stdout);
    loop {
        let frame = read_message_async::<_, WorkerResponse>(&mut reader).await;
        let Some(state) = state.upgrade() else {
            return;
        };
        match frame {
            Ok(Some(response)) => dispatch(&state, generation, response),
            Ok(None) => {
                worker_lost(&state, generation, "worker closed its output".to_string());
                return;
            }
            Err(Error::Serialization(message)) => {
                // Frame boundaries are intact; only this message is lost.
                reject_pending(&state, generation, Error::Ipc(message));
            }
            Err(e) => {
                worker_lost(&state, generation, e.to_string());
                return;
            }
        }
    }
}

fn dispatch(state: &Mutex<ManagerState>, generation: u64, response: WorkerResponse) {
    match response {
        WorkerResponse::BenchmarkProgress { progress } => {
            let callback = {
                let guard = lock(state);
                if !guard.owns(generation) {
                    return;
                }
                guard.pending.as_ref().map(|p| p.on_progress.clone())
            };
            match callback {
                Some(callback) => callback(progress),
                None => debug!("Progress with no outstanding run: {:?}", progress),
            }
        }
        WorkerResponse::BenchmarkComplete { results } => {
            complete(state, generation, Ok(results));
        }
        WorkerResponse::BenchmarkError { error } => {
            complete(state, generation, Err(Error::Benchmark(error)));
        }
    }
}

fn complete(state: &Mutex<ManagerState>, generation: u64, outcome: Result<Vec<BenchmarkResult>>) {
    let pending = {
        let mut guard = lock(state);
        if !guard.owns(generation) {
            return;
        }
        guard.pending.take()
    };
    match pending {
        Some(pending) => {
            let _ = pending.reply.send(outcome);
        }
        None => debug!("Dropping terminal frame with no outstanding run"),
    }
}

fn reject_pending(state: &Mutex<ManagerState>, generation: u64, error: Error) {
    complete(state, generation, Err(error));
}

fn worker_lost(state: &Mutex<ManagerState>, generation: u64, reason: String) {
    let (worker, pending) = {
        let mut guard = lock(state);
        if !guard.owns(generation) {
            return;
        }
        guard.unavailable = Some(format!("worker exited: {}", reason));
        (guard.worker.take(), guard.pending.take())
    };
    warn!("Worker lost: {}", reason);
    if let Some(worker) = worker {
        worker.kill();
    }
    if let Some(pending) = pending {
        let _ = pending.reply.send(Err(Error::WorkerCrashed(reason)));
    }
}
