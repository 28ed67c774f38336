//! Run settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and output settings for a batch run
///
/// Durations are in seconds and may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Host for the upload and outputs endpoints
    pub base_url: String,
    pub request_timeout_secs: f64,
    /// Pause between failed attempts of the same task
    pub retry_interval_secs: f64,
    /// A task is attempted `max_retries + 1` times
    pub max_retries: u32,
    /// Pause between successful tasks
    pub success_delay_secs: f64,
    pub polling_interval_secs: f64,
    /// Wall-clock budget for one attempt
    pub task_timeout_secs: f64,
    pub report_dir: PathBuf,
    pub results_file: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    /// Random pause range between downloads, in milliseconds
    pub download_delay_ms: (u64, u64),
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.runninghub.cn".to_string(),
            request_timeout_secs: 60.0,
            retry_interval_secs: 60.0,
            max_retries: 6,
            success_delay_secs: 0.0,
            polling_interval_secs: 5.0,
            task_timeout_secs: 300.0,
            report_dir: PathBuf::from("."),
            results_file: Some(PathBuf::from("results.json")),
            download_dir: None,
            download_delay_ms: (3000, 4000),
        }
    }
}

impl RunConfig {
    /// Load settings from JSON; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, secs: f64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_retry_interval(mut self, secs: f64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_success_delay(mut self, secs: f64) -> Self {
        self.success_delay_secs = secs;
        self
    }

    pub fn with_polling_interval(mut self, secs: f64) -> Self {
        self.polling_interval_secs = secs;
        self
    }

    pub fn with_task_timeout(mut self, secs: f64) -> Self {
        self.task_timeout_secs = secs;
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn with_results_file(mut self, file: Option<PathBuf>) -> Self {
        self.results_file = file;
        self
    }

    pub fn with_download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    pub fn with_download_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.download_delay_ms = (min.min(max), min.max(max));
        self
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        seconds(self.retry_interval_secs)
    }

    pub fn success_delay(&self) -> Duration {
        seconds(self.success_delay_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        seconds(self.polling_interval_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        seconds(self.task_timeout_secs)
    }

    /// Number of attempts per task
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
