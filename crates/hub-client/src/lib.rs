//! RunningHub task client
//!
//! Uploads local files, creates tasks from request payloads, polls them to
//! completion with retries, and downloads the produced files.

use std::path::PathBuf;
use thiserror::Error;

pub mod backends;
pub mod download;
pub mod lifecycle;
pub mod report;
pub mod settings;

pub use backends::{OutputsStatus, RunningHubBackend, TaskBackend, TaskId};
pub use download::{download_results, result_file_name};
pub use lifecycle::{run_task, run_with_retries, TaskOutcome, TaskSuccess};
pub use report::{write_failure_report, FailureReport};
pub use settings::RunConfig;

/// Errors raised while talking to the task service
#[derive(Debug, Error)]
pub enum HubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("task creation failed: {0}")]
    CreateTask(String),
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },
    #[error("task {task_id} did not finish within {secs}s")]
    Timeout { task_id: TaskId, secs: f64 },
    #[error("download failed: {0}")]
    Download(String),
}

impl HubError {
    /// Task id, when the error happened after the task was created
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskFailed { task_id, .. } | Self::Timeout { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
