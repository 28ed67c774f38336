use hub_client::{TaskId, TaskOutcome};
use serde::{Deserialize, Serialize};
use std::path::Path;
use workflow::BatchMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// One line of the results file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    /// 1-based task number
    pub index: usize,
    pub mode: String,
    pub status: TaskStatus,
    pub task_id: Option<TaskId>,
    pub attempts: u32,
    pub results: Vec<String>,
    pub error: Option<String>,
}

impl ResultEntry {
    pub fn new(mode: BatchMode, outcome: &TaskOutcome) -> Self {
        Self {
            index: outcome.index + 1,
            mode: mode.code().to_string(),
            status: if outcome.succeeded() {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            },
            task_id: outcome.task_id.clone(),
            attempts: outcome.attempts,
            results: outcome.urls.clone(),
            error: outcome.error.clone(),
        }
    }
}

pub fn write_results(path: &Path, entries: &[ResultEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)
}
