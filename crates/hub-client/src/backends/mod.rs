//! Task service backends
//!
//! `TaskBackend` is the seam between the batch pipeline and the remote
//! service; `RunningHubBackend` talks to the RunningHub open API.

pub mod runninghub;

use crate::HubError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use workflow::RequestPayload;

pub use runninghub::RunningHubBackend;

/// Remote task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a task as reported by the outputs endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputsStatus {
    /// Finished, with the URLs of the produced files
    Ready(Vec<String>),
    /// Still queued or running
    Pending(String),
    /// Finished without output
    Failed(String),
}

/// Task service backend
#[async_trait::async_trait]
pub trait TaskBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Upload a local file, returning the remote file reference
    async fn upload(&self, path: &Path, file_type: &str) -> Result<String, HubError>;

    /// Create a task from a payload
    async fn create_task(&self, url: &str, payload: &RequestPayload) -> Result<TaskId, HubError>;

    /// Query a task's outputs
    async fn query_outputs(&self, task_id: &TaskId) -> Result<OutputsStatus, HubError>;

    /// Download a produced file
    async fn download(&self, url: &str, dest: &Path) -> Result<(), HubError>;
}
