//! Failure report files

use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::error;

/// What went wrong with a task that ran out of attempts
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub time: DateTime<Local>,
    pub message: String,
    pub url: String,
    pub webapp_id: String,
    pub api_key: String,
}

impl FailureReport {
    pub fn new(
        message: impl Into<String>,
        url: impl Into<String>,
        webapp_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            time: Local::now(),
            message: message.into(),
            url: url.into(),
            webapp_id: webapp_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Report text; the API key is cut to its first four characters
    pub fn render(&self) -> String {
        let key_head: String = self.api_key.chars().take(4).collect();
        let mut text = String::new();
        let _ = writeln!(text, "--- API Runner error report ---");
        let _ = writeln!(text, "Timestamp: {}", self.time.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(text, "Error: {}", self.message);
        let _ = writeln!(text, "--- Current API configuration ---");
        let _ = writeln!(text, "URL: {}", self.url);
        let _ = writeln!(text, "Webapp ID: {}", self.webapp_id);
        let _ = writeln!(text, "API Key: {}...", key_head);
        let _ = writeln!(text, "------------------------------");
        text
    }

    /// `ERROR_REPORT_<YYYYmmdd_HHMMSS>.txt`
    pub fn file_name(&self) -> String {
        format!("ERROR_REPORT_{}.txt", self.time.format("%Y%m%d_%H%M%S"))
    }
}

/// Log the failure and write its report into `dir`
///
/// A report from the same second gets a numeric suffix instead of
/// overwriting the earlier one.
pub fn write_failure_report(dir: &Path, report: &FailureReport) -> std::io::Result<PathBuf> {
    error!("{}", report.message);

    std::fs::create_dir_all(dir)?;
    let base = report.file_name();
    let mut path = dir.join(&base);
    let mut n = 1;
    while path.exists() {
        let stem = base.trim_end_matches(".txt");
        path = dir.join(format!("{}_{}.txt", stem, n));
        n += 1;
    }

    std::fs::write(&path, report.render())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_redacts_key() {
        let dir = tempfile::tempdir().unwrap();
        let report = FailureReport::new(
            "task creation failed: bad request",
            "https://www.runninghub.cn/task/openapi/ai-app/run",
            "1937",
            "abcdef123456",
        );

        let path = write_failure_report(dir.path(), &report).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ERROR_REPORT_") && name.ends_with(".txt"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("API Key: abcd..."));
        assert!(!text.contains("abcdef123456"));
        assert!(text.contains("Webapp ID: 1937"));
        assert!(text.contains("bad request"));
    }

    #[test]
    fn test_same_second_reports_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let report = FailureReport::new("boom", "u", "w", "key1");
        let first = write_failure_report(dir.path(), &report).unwrap();
        let second = write_failure_report(dir.path(), &report).unwrap();
        assert_ne!(first, second);
    }
}
