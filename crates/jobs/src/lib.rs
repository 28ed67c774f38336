use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use hub_client::{download_results, run_with_retries, RunConfig, TaskBackend, TaskOutcome};
use workflow::{BatchMode, ExpandError};

mod prepare;
mod results;
mod upload;

pub use prepare::{prepare_batch, BatchRequest, PreparedBatch};
pub use results::{write_results, ResultEntry, TaskStatus};
pub use upload::UploadCache;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a batch is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("batch worker panicked")]
    WorkerPanicked,
}

/// Counts reported when a run ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: BatchMode,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub downloads_failed: usize,
    pub dropped_uploads: usize,
    pub results_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    Prepared { mode: BatchMode, total: usize },
    TaskStarted { index: usize, total: usize },
    TaskFinished(TaskOutcome),
    Finished(RunSummary),
    Aborted(String),
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepared { mode, total } => write!(f, "{}: {} requests", mode, total),
            Self::TaskStarted { index, total } => write!(f, "task {}/{} started", index + 1, total),
            Self::TaskFinished(outcome) => match &outcome.error {
                None => write!(
                    f,
                    "task {} succeeded after {} attempt(s), {} outputs",
                    outcome.index + 1,
                    outcome.attempts,
                    outcome.urls.len()
                ),
                Some(e) => write!(f, "task {} failed: {}", outcome.index + 1, e),
            },
            Self::Finished(summary) => write!(
                f,
                "finished: {} succeeded, {} failed of {}",
                summary.succeeded, summary.failed, summary.total
            ),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Where a run reports progress: the event channel and the shared log
#[derive(Clone)]
pub struct EventSink {
    tx_events: Sender<BatchEvent>,
    log: Arc<Mutex<Vec<String>>>,
}

impl EventSink {
    pub fn channel() -> (Self, Receiver<BatchEvent>) {
        let (tx_events, rx_events) = unbounded();
        (
            Self {
                tx_events,
                log: Arc::new(Mutex::new(Vec::new())),
            },
            rx_events,
        )
    }

    pub fn emit(&self, event: BatchEvent) {
        self.log.lock().push(event.to_string());
        let _ = self.tx_events.send(event);
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

/// Owner of the "running" flag; at most one batch runs at a time
#[derive(Default)]
pub struct BatchRuntime {
    running: Arc<AtomicBool>,
}

pub struct BatchHandle {
    pub run_id: String,
    pub rx_events: Receiver<BatchEvent>,
    sink: EventSink,
    worker: thread::JoinHandle<Result<RunSummary, JobError>>,
}

impl BatchHandle {
    /// Log lines written so far
    pub fn log_lines(&self) -> Vec<String> {
        self.sink.log_lines()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker to finish
    pub fn join(self) -> Result<RunSummary, JobError> {
        self.worker.join().map_err(|_| JobError::WorkerPanicked)?
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a batch on a background worker
    pub fn start(
        &self,
        request: BatchRequest,
        backend: Arc<dyn TaskBackend>,
        config: RunConfig,
    ) -> Result<BatchHandle, JobError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JobError::AlreadyRunning);
        }
        let guard = RunningGuard(self.running.clone());

        let run_id = Uuid::new_v4().to_string();
        let (sink, rx_events) = EventSink::channel();
        let worker_sink = sink.clone();
        let worker_id = run_id.clone();

        let worker = thread::Builder::new()
            .name("batch-worker".to_string())
            .spawn(move || -> Result<RunSummary, JobError> {
                let _guard = guard;
                info!("Run {} started", worker_id);
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let result =
                    runtime.block_on(run_batch(&request, backend.as_ref(), &config, &worker_sink));
                if let Err(e) = &result {
                    error!("Run {} aborted: {}", worker_id, e);
                    worker_sink.emit(BatchEvent::Aborted(e.to_string()));
                }
                result
            })?;

        Ok(BatchHandle {
            run_id,
            rx_events,
            sink,
            worker,
        })
    }
}

/// The batch pipeline: prepare, then submit each payload in order
pub async fn run_batch(
    request: &BatchRequest,
    backend: &dyn TaskBackend,
    config: &RunConfig,
    sink: &EventSink,
) -> Result<RunSummary, JobError> {
    let mut cache = UploadCache::new();
    let prepared = prepare_batch(request, Some(backend), &mut cache).await?;
    let total = prepared.payloads.len();
    sink.emit(BatchEvent::Prepared {
        mode: prepared.mode,
        total,
    });

    let mut entries = Vec::with_capacity(total);
    let mut succeeded = 0;
    let mut downloads_failed = 0;

    for (index, payload) in prepared.payloads.iter().enumerate() {
        sink.emit(BatchEvent::TaskStarted { index, total });
        let outcome = run_with_retries(backend, index, &request.config.url, payload, config).await;

        if outcome.succeeded() {
            succeeded += 1;
            if let Some(dir) = &config.download_dir {
                let (_, failed) = download_results(backend, index, &outcome.urls, dir, config).await;
                downloads_failed += failed;
            }
            if index + 1 < total && !config.success_delay().is_zero() {
                tokio::time::sleep(config.success_delay()).await;
            }
        }

        entries.push(ResultEntry::new(prepared.mode, &outcome));
        sink.emit(BatchEvent::TaskFinished(outcome));
    }

    let results_file = match &config.results_file {
        Some(path) => match write_results(path, &entries) {
            Ok(()) => {
                info!("Results written to {}", path.display());
                Some(path.clone())
            }
            Err(e) => {
                error!("Failed to write results to {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let summary = RunSummary {
        mode: prepared.mode,
        total,
        succeeded,
        failed: total - succeeded,
        downloads_failed,
        dropped_uploads: prepared.dropped_uploads.len(),
        results_file,
    };
    info!(
        "Batch finished: {} succeeded, {} failed, {} total",
        summary.succeeded, summary.failed, summary.total
    );
    sink.emit(BatchEvent::Finished(summary.clone()));
    Ok(summary)
}
