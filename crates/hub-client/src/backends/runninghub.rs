//! RunningHub open API backend
//!
//! Uploads go to `/task/openapi/upload`, results are read from
//! `/task/openapi/outputs`; the task creation URL comes from the API
//! configuration.

use super::{OutputsStatus, TaskBackend, TaskId};
use crate::settings::RunConfig;
use crate::HubError;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;
use workflow::{ApiConfig, RequestPayload};

/// Business code for a task that ended in failure
const CODE_TASK_FAILED: i64 = 805;

/// RunningHub backend
pub struct RunningHubBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RunningHubBackend {
    /// Create a backend for one API configuration
    pub fn new(config: &ApiConfig, settings: &RunConfig) -> Result<Self, HubError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/task/openapi/{}", self.base_url, path)
    }

    async fn post_json(&self, url: &str, body: &impl serde::Serialize) -> Result<ApiResponse, HubError> {
        let response = self.client.post(url).json(body).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl TaskBackend for RunningHubBackend {
    fn name(&self) -> &str {
        "RunningHub"
    }

    async fn upload(&self, path: &Path, file_type: &str) -> Result<String, HubError> {
        if !path.is_file() {
            return Err(HubError::MissingFile(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let bytes = tokio::fs::read(path).await?;

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("apiKey", self.api_key.clone())
            .text("fileType", file_type.to_string());

        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: ApiResponse = response.json().await?;

        let file_name = body
            .data
            .get("fileName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        match (body.code, file_name) {
            (Some(0), Some(name)) => Ok(name.to_string()),
            _ => Err(HubError::Upload(body.message())),
        }
    }

    async fn create_task(&self, url: &str, payload: &RequestPayload) -> Result<TaskId, HubError> {
        debug!(
            "Creating task: {}",
            serde_json::to_string(&payload.redacted()).unwrap_or_default()
        );
        let body = self.post_json(url, payload).await?;

        let task_id = body.data.get("taskId").and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        match (body.code, task_id) {
            (Some(0), Some(id)) => Ok(TaskId(id)),
            _ => Err(HubError::CreateTask(body.message())),
        }
    }

    async fn query_outputs(&self, task_id: &TaskId) -> Result<OutputsStatus, HubError> {
        let request = serde_json::json!({
            "apiKey": self.api_key,
            "taskId": task_id.0,
        });
        let body = self.post_json(&self.endpoint("outputs"), &request).await?;
        Ok(body.outputs_status())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), HubError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HubError::Download(format!("{} returned {}", url, response.status())));
        }

        let bytes = response.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }
}

/// Envelope shared by every RunningHub response
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    fn message(&self) -> String {
        match &self.msg {
            Some(msg) if !msg.is_empty() => msg.clone(),
            _ => format!("unexpected response (code {:?})", self.code),
        }
    }

    /// Interpret an outputs response
    pub fn outputs_status(&self) -> OutputsStatus {
        match self.code {
            Some(0) => {
                let urls: Vec<String> = self
                    .data
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.get("fileUrl").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if urls.is_empty() {
                    OutputsStatus::Failed(self.message())
                } else {
                    OutputsStatus::Ready(urls)
                }
            }
            Some(CODE_TASK_FAILED) => {
                let reason = match self.data.get("failedReason") {
                    Some(Value::String(s)) if !s.is_empty() => s.clone(),
                    Some(Value::Null | Value::String(_)) | None => self.message(),
                    Some(other) => other.to_string(),
                };
                OutputsStatus::Failed(reason)
            }
            _ => OutputsStatus::Pending(self.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(value: Value) -> ApiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_outputs_ready() {
        let status = response(serde_json::json!({
            "code": 0,
            "msg": "success",
            "data": [{"fileUrl": "https://cdn/a.png", "fileType": "png"}, {"fileUrl": "https://cdn/b.png"}]
        }))
        .outputs_status();
        assert_eq!(
            status,
            OutputsStatus::Ready(vec!["https://cdn/a.png".into(), "https://cdn/b.png".into()])
        );
    }

    #[test]
    fn test_outputs_empty_data_is_failure() {
        let status = response(serde_json::json!({"code": 0, "msg": "no outputs", "data": []}))
            .outputs_status();
        assert_eq!(status, OutputsStatus::Failed("no outputs".into()));
    }

    #[test]
    fn test_outputs_failed_reason() {
        let status = response(serde_json::json!({
            "code": 805,
            "msg": "APIKEY_TASK_STATUS_ERROR",
            "data": {"failedReason": "out of memory"}
        }))
        .outputs_status();
        assert_eq!(status, OutputsStatus::Failed("out of memory".into()));

        let status = response(serde_json::json!({"code": 805, "msg": "failed", "data": null}))
            .outputs_status();
        assert_eq!(status, OutputsStatus::Failed("failed".into()));
    }

    #[test]
    fn test_outputs_other_codes_pending() {
        let status = response(serde_json::json!({"code": 804, "msg": "APIKEY_TASK_IS_RUNNING"}))
            .outputs_status();
        assert_eq!(status, OutputsStatus::Pending("APIKEY_TASK_IS_RUNNING".into()));
    }

    #[test]
    fn test_backend_endpoints() {
        let config = workflow::parse_config(
            r#"{"url": "https://x/run", "webappId": 1, "apiKey": "k",
                "nodeInfoList": [{"nodeId": "1", "fieldName": "text"}]}"#,
        )
        .unwrap();
        let settings = RunConfig::default().with_base_url("https://example.com/");
        let backend = RunningHubBackend::new(&config, &settings).unwrap();
        assert_eq!(backend.name(), "RunningHub");
        assert_eq!(backend.endpoint("upload"), "https://example.com/task/openapi/upload");
    }
}
