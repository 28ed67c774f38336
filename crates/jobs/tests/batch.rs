use hub_client::{HubError, OutputsStatus, RunConfig, TaskBackend, TaskId};
use jobs::{
    prepare_batch, run_batch, BatchEvent, BatchRequest, BatchRuntime, EventSink, JobError,
    TaskStatus, UploadCache,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use workflow::{parse_config, BatchMode, ExpandError, InterfaceTemplate, RequestPayload};

const CONFIG: &str = r#"{
    "url": "https://www.runninghub.cn/task/openapi/ai-app/run",
    "webappId": "1937",
    "apiKey": "abcd1234efgh",
    "nodeInfoList": [
        {"nodeId": "39", "fieldName": "image", "fieldValue": "default.png", "description": "image"},
        {"nodeId": "52", "fieldName": "prompt", "fieldValue": "a cat", "description": "prompt"},
        {"nodeId": "3", "fieldName": "seed", "fieldValue": "1", "description": "seed"}
    ]
}"#;

/// Backend that records calls; tasks whose image contains "bad" fail
#[derive(Default)]
struct FakeBackend {
    uploads: Mutex<Vec<String>>,
    created: Mutex<Vec<RequestPayload>>,
    poll_delay: Duration,
}

#[async_trait::async_trait]
impl TaskBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn upload(&self, path: &Path, _file_type: &str) -> Result<String, HubError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.uploads.lock().push(name.clone());
        if name.starts_with("broken") {
            return Err(HubError::Upload("rejected".into()));
        }
        Ok(format!("api/{}", name))
    }

    async fn create_task(&self, _url: &str, payload: &RequestPayload) -> Result<TaskId, HubError> {
        let mut created = self.created.lock();
        created.push(payload.clone());
        Ok(TaskId(format!("t{}", created.len())))
    }

    async fn query_outputs(&self, task_id: &TaskId) -> Result<OutputsStatus, HubError> {
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let index: usize = task_id.0.trim_start_matches('t').parse().unwrap();
        let payload = self.created.lock()[index - 1].clone();
        let image = payload.node("39").unwrap().field_value.clone();
        if image.contains("bad") {
            Ok(OutputsStatus::Failed("bad input".into()))
        } else {
            Ok(OutputsStatus::Ready(vec![format!("https://cdn/{}.png", task_id)]))
        }
    }

    async fn download(&self, _url: &str, dest: &Path) -> Result<(), HubError> {
        std::fs::write(dest, b"png").map_err(HubError::from)
    }
}

fn workspace(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in files {
        std::fs::write(dir.path().join(name), b"data").unwrap();
    }
    dir
}

fn request(dir: &Path) -> BatchRequest {
    let config = parse_config(CONFIG).unwrap();
    let template = InterfaceTemplate::from_config(&config).unwrap();
    BatchRequest::new(config, template, dir)
}

fn fast_config(dir: &Path) -> RunConfig {
    RunConfig::default()
        .with_polling_interval(0.001)
        .with_retry_interval(0.001)
        .with_task_timeout(5.0)
        .with_report_dir(dir.join("reports"))
        .with_results_file(Some(dir.join("results.json")))
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn failed_upload_is_excluded_from_expansion() {
    let dir = workspace(&["a.png", "broken.png", "c.png"]);
    let mut req = request(dir.path());
    req.images = names(&["a.png", "broken.png", "c.png", "missing.png"]);
    let backend = FakeBackend::default();

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();

    assert_eq!(prepared.mode, BatchMode::PureImages);
    assert_eq!(prepared.payloads.len(), 2);
    assert_eq!(prepared.dropped_uploads, names(&["broken.png", "missing.png"]));
    let images: Vec<_> = prepared
        .payloads
        .iter()
        .map(|p| p.node("39").unwrap().field_value.as_str())
        .collect();
    assert_eq!(images, vec!["api/a.png", "api/c.png"]);
}

#[tokio::test]
async fn uploads_are_memoized_by_name() {
    let dir = workspace(&["a.png", "b.png", "c.png"]);
    let mut req = request(dir.path());
    req.images = names(&["a.png", "b.png", "c.png"]);
    req.fixed_image = Some("a.png".into());
    req.mode = Some(BatchMode::FixedOnePlus);
    let backend = FakeBackend::default();

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();

    assert_eq!(*backend.uploads.lock(), names(&["a.png", "b.png", "c.png"]));
    assert_eq!(cache.len(), 3);
    let images: Vec<_> = prepared
        .payloads
        .iter()
        .map(|p| p.node("39").unwrap().field_value.as_str())
        .collect();
    assert_eq!(images, vec!["api/a.png,api/b.png", "api/a.png,api/c.png"]);
}

#[tokio::test]
async fn fixed_prefix_mismatch_aborts_before_submission() {
    let dir = workspace(&["a.png", "b.png", "c.png"]);
    let mut req = request(dir.path());
    req.images = names(&["a.png", "b.png", "c.png"]);
    req.fixed_image = Some("a.png".into());
    req.mode = Some(BatchMode::FixedTwoPlus);
    let backend = FakeBackend::default();
    let (sink, _rx) = EventSink::channel();

    let err = run_batch(&req, &backend, &fast_config(dir.path()), &sink)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::Expand(ExpandError::FixedPrefix { expected: 2, found: 1, .. })
    ));
    assert!(backend.created.lock().is_empty());
}

#[tokio::test]
async fn dry_run_uses_local_names() {
    let dir = workspace(&["prompts.json"]);
    std::fs::write(dir.path().join("prompts.json"), r#"["one", "two"]"#).unwrap();
    let mut req = request(dir.path());
    req.images = names(&["x.png", "y.png"]);
    req.prompt_files = names(&["prompts.json"]);

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, None, &mut cache).await.unwrap();

    assert_eq!(prepared.mode, BatchMode::Zip);
    assert!(cache.is_empty());
    assert_eq!(prepared.payloads[1].node("39").unwrap().field_value, "y.png");
    assert_eq!(prepared.payloads[1].node("52").unwrap().field_value, "two");
}

#[test]
fn failing_task_does_not_block_the_rest() {
    let dir = workspace(&["good1.png", "bad.png", "good2.png"]);
    let mut req = request(dir.path());
    req.images = names(&["good1.png", "bad.png", "good2.png"]);
    let config = fast_config(dir.path())
        .with_max_retries(1)
        .with_download_dir(Some(dir.path().join("out")))
        .with_download_delay_ms(0, 0);

    let runtime = BatchRuntime::new();
    let handle = runtime
        .start(req, Arc::new(FakeBackend::default()), config)
        .unwrap();

    let mut collected = Vec::new();
    for event in handle.rx_events.iter() {
        let done = matches!(event, BatchEvent::Finished(_));
        collected.push(event);
        if done {
            break;
        }
    }
    assert!(handle.log_lines().iter().any(|l| l.contains("task 2 failed")));
    let summary = handle.join().unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.downloads_failed, 0);
    assert!(!runtime.is_running());

    let reports = std::fs::read_dir(dir.path().join("reports")).unwrap().count();
    assert_eq!(reports, 1);
    assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 2);

    let results: Vec<jobs::ResultEntry> =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("results.json")).unwrap())
            .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[1].status, TaskStatus::Failed);
    assert_eq!(results[1].attempts, 2);
    assert_eq!(results[2].index, 3);

    assert!(matches!(collected.first(), Some(BatchEvent::Prepared { total: 3, .. })));
    assert!(matches!(collected.last(), Some(BatchEvent::Finished(_))));
}

#[test]
fn second_start_is_refused_while_running() {
    let dir = workspace(&["a.png"]);
    let mut req = request(dir.path());
    req.images = names(&["a.png"]);
    let backend = Arc::new(FakeBackend {
        poll_delay: Duration::from_millis(200),
        ..Default::default()
    });

    let runtime = BatchRuntime::new();
    let handle = runtime
        .start(req.clone(), backend.clone(), fast_config(dir.path()))
        .unwrap();
    assert!(runtime.is_running());
    assert!(matches!(
        runtime.start(req, backend, fast_config(dir.path())),
        Err(JobError::AlreadyRunning)
    ));

    let summary = handle.join().unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(!runtime.is_running());
}

const MEDIA_CONFIG: &str = r#"{
    "url": "https://www.runninghub.cn/task/openapi/ai-app/run",
    "webappId": "1937",
    "apiKey": "abcd1234efgh",
    "nodeInfoList": [
        {"nodeId": "10", "fieldName": "image", "fieldValue": "in.png", "description": "image"},
        {"nodeId": "11", "fieldName": "video", "fieldValue": "in.mp4", "description": "video"},
        {"nodeId": "12", "fieldName": "text", "fieldValue": "", "description": "prompt"}
    ]
}"#;

fn media_request(dir: &Path) -> BatchRequest {
    let config = parse_config(MEDIA_CONFIG).unwrap();
    let template = InterfaceTemplate::from_config(&config).unwrap();
    BatchRequest::new(config, template, dir)
}

fn node_values(payloads: &[RequestPayload], node_id: &str) -> Vec<String> {
    payloads
        .iter()
        .map(|p| p.node(node_id).unwrap().field_value.clone())
        .collect()
}

#[tokio::test]
async fn image_slot_edit_is_never_sent_as_a_value() {
    let dir = workspace(&["a.png", "v1.mp4", "v2.mp4"]);
    let mut req = media_request(dir.path());
    req.editor.apply_assignment(&req.template, "10=a.png").unwrap();
    req.fixed_image = Some("a.png".into());
    req.videos = names(&["v1.mp4", "v2.mp4"]);
    let backend = FakeBackend::default();

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();
    assert_eq!(prepared.mode, BatchMode::PureVideos);
    assert_eq!(node_values(&prepared.payloads, "10"), vec!["in.png", "in.png"]);
    assert_eq!(node_values(&prepared.payloads, "11"), vec!["api/v1.mp4", "api/v2.mp4"]);

    req.mode = Some(BatchMode::VideosFixed);
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();
    assert_eq!(node_values(&prepared.payloads, "10"), vec!["api/a.png", "api/a.png"]);

    req.videos.clear();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();
    assert_eq!(prepared.mode, BatchMode::Single);
    assert_eq!(node_values(&prepared.payloads, "10"), vec!["api/a.png"]);
}

#[tokio::test]
async fn partially_failed_fixed_image_is_not_used() {
    let dir = workspace(&["a.png", "broken.png"]);
    let mut req = request(dir.path());
    req.fixed_image = Some("a.png,broken.png".into());
    req.extra_prompts = names(&["p1", "p2"]);
    let backend = FakeBackend::default();

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();

    assert_eq!(prepared.mode, BatchMode::PromptsOnly);
    assert_eq!(prepared.dropped_uploads, names(&["broken.png"]));
    assert_eq!(node_values(&prepared.payloads, "39"), vec!["default.png", "default.png"]);
    assert_eq!(node_values(&prepared.payloads, "52"), vec!["p1", "p2"]);
}

const TWO_IMAGE_CONFIG: &str = r#"{
    "url": "https://www.runninghub.cn/task/openapi/ai-app/run",
    "webappId": "1937",
    "apiKey": "abcd1234efgh",
    "nodeInfoList": [
        {"nodeId": "39", "fieldName": "image", "fieldValue": "body.png", "description": "body"},
        {"nodeId": "40", "fieldName": "image", "fieldValue": "face.png", "description": "face"}
    ]
}"#;

#[tokio::test]
async fn pinned_images_are_uploaded_into_their_fields() {
    let dir = workspace(&["body.png", "a.png", "b.png", "broken.png"]);
    let config = parse_config(TWO_IMAGE_CONFIG).unwrap();
    let template = InterfaceTemplate::from_config(&config).unwrap();
    let mut req = BatchRequest::new(config, template, dir.path());
    req.images = names(&["a.png", "b.png"]);
    req.pinned_images = [(1, "body.png".to_string())].into_iter().collect();
    req.mode = Some(BatchMode::PinnedNodes);
    let backend = FakeBackend::default();

    let mut cache = UploadCache::new();
    let prepared = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap();
    assert_eq!(node_values(&prepared.payloads, "39"), vec!["api/body.png", "api/body.png"]);
    assert_eq!(node_values(&prepared.payloads, "40"), vec!["api/a.png", "api/b.png"]);

    req.pinned_images = [(1, "broken.png".to_string())].into_iter().collect();
    let err = prepare_batch(&req, Some(&backend), &mut cache).await.unwrap_err();
    assert!(matches!(
        err,
        JobError::Expand(ExpandError::PinnedNodes { pinned: 0, .. })
    ));
}
