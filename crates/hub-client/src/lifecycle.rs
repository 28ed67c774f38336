//! Task lifecycle: create, poll until done, retry on failure

use crate::backends::{OutputsStatus, TaskBackend, TaskId};
use crate::report::{write_failure_report, FailureReport};
use crate::settings::RunConfig;
use crate::HubError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use workflow::RequestPayload;

/// A task that finished with outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSuccess {
    pub task_id: TaskId,
    pub urls: Vec<String>,
}

/// Final state of one payload after all attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub index: usize,
    pub task_id: Option<TaskId>,
    pub attempts: u32,
    pub urls: Vec<String>,
    pub error: Option<String>,
    /// Failure report written after the last attempt
    pub report: Option<PathBuf>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Create a task and poll it until it finishes or runs out of time
///
/// Errors from individual polls are logged and polling continues; only the
/// timeout ends a task that never reports a final state.
pub async fn run_task(
    backend: &dyn TaskBackend,
    url: &str,
    payload: &RequestPayload,
    config: &RunConfig,
) -> Result<TaskSuccess, HubError> {
    let task_id = backend.create_task(url, payload).await?;
    info!("Task created: {}", task_id);

    let started = Instant::now();
    let timeout = config.task_timeout();
    loop {
        if started.elapsed() > timeout {
            return Err(HubError::Timeout {
                task_id,
                secs: config.task_timeout_secs,
            });
        }

        tokio::time::sleep(config.polling_interval()).await;

        match backend.query_outputs(&task_id).await {
            Ok(OutputsStatus::Ready(urls)) => {
                info!("Task {} finished with {} outputs", task_id, urls.len());
                return Ok(TaskSuccess { task_id, urls });
            }
            Ok(OutputsStatus::Failed(message)) => {
                return Err(HubError::TaskFailed { task_id, message });
            }
            Ok(OutputsStatus::Pending(message)) => {
                debug!("Task {} still running: {}", task_id, message);
            }
            Err(e) => {
                warn!("Polling task {} failed, will retry: {}", task_id, e);
            }
        }
    }
}

/// Run a payload with up to `max_retries + 1` attempts
///
/// When every attempt fails a failure report is written to the report
/// directory; the outcome records the last error either way.
pub async fn run_with_retries(
    backend: &dyn TaskBackend,
    index: usize,
    url: &str,
    payload: &RequestPayload,
    config: &RunConfig,
) -> TaskOutcome {
    let attempts = config.attempts();
    let mut last_error = String::new();
    let mut last_task_id = None;

    for attempt in 1..=attempts {
        info!("Task #{} attempt {}/{}", index + 1, attempt, attempts);
        match run_task(backend, url, payload, config).await {
            Ok(success) => {
                return TaskOutcome {
                    index,
                    task_id: Some(success.task_id),
                    attempts: attempt,
                    urls: success.urls,
                    error: None,
                    report: None,
                };
            }
            Err(e) => {
                warn!("Task #{} attempt {}/{} failed: {}", index + 1, attempt, attempts, e);
                if let Some(id) = e.task_id() {
                    last_task_id = Some(id.clone());
                }
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(config.retry_interval()).await;
                }
            }
        }
    }

    let message = format!(
        "Task #{} failed after {} attempts: {}",
        index + 1,
        attempts,
        last_error
    );
    let report = FailureReport::new(
        message,
        url,
        payload.webapp_id.to_string(),
        payload.api_key.clone(),
    );
    let report = match write_failure_report(&config.report_dir, &report) {
        Ok(path) => {
            info!("Failure report written to {}", path.display());
            Some(path)
        }
        Err(e) => {
            error!("Failed to write failure report: {}", e);
            None
        }
    };

    TaskOutcome {
        index,
        task_id: last_task_id,
        attempts,
        urls: Vec::new(),
        error: Some(last_error),
        report,
    }
}
