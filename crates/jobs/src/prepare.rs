use crate::upload::UploadCache;
use crate::JobError;
use hub_client::TaskBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};
use workflow::{
    expand, extract_prompts, select_mode, ApiConfig, AssetCounts, BatchMode, EditorValues,
    ExpansionInput, FieldKind, InterfaceTemplate, PayloadBuilder, RequestPayload, SlotDefaults,
};

/// Everything a batch run needs from the user
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub config: ApiConfig,
    pub template: InterfaceTemplate,
    pub editor: EditorValues,
    /// Working directory holding the selected files
    pub dir: PathBuf,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub prompt_files: Vec<String>,
    /// Prompts given directly, appended after the file prompts
    pub extra_prompts: Vec<String>,
    /// Requested mode; `None` lets the counts decide
    pub mode: Option<BatchMode>,
    /// Local file(s) for the image slot, comma-separated
    pub fixed_image: Option<String>,
    /// Local file for the video slot
    pub fixed_video: Option<String>,
    /// Local images pinned to image field positions (1-based), for M13
    pub pinned_images: BTreeMap<usize, String>,
}

impl BatchRequest {
    pub fn new(config: ApiConfig, template: InterfaceTemplate, dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            template,
            editor: EditorValues::new(),
            dir: dir.into(),
            images: Vec::new(),
            videos: Vec::new(),
            prompt_files: Vec::new(),
            extra_prompts: Vec::new(),
            mode: None,
            fixed_image: None,
            fixed_video: None,
            pinned_images: BTreeMap::new(),
        }
    }
}

/// Payloads ready to submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedBatch {
    pub mode: BatchMode,
    pub counts: AssetCounts,
    pub payloads: Vec<RequestPayload>,
    /// Files left out because their upload failed
    pub dropped_uploads: Vec<String>,
    /// The mode produced nothing and the single default request is used
    pub fell_back: bool,
}

/// Upload the selection, gather prompts, pick the mode and build payloads
///
/// Without a backend nothing is uploaded and local file names stand in for
/// remote references.
pub async fn prepare_batch(
    request: &BatchRequest,
    backend: Option<&dyn TaskBackend>,
    cache: &mut UploadCache,
) -> Result<PreparedBatch, JobError> {
    let mut prompts = extract_prompts(
        &request.dir,
        &request.prompt_files,
        request.template.slot(FieldKind::Text),
    );
    prompts.extend(
        request
            .extra_prompts
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned(),
    );

    let mut failures = Vec::new();
    let (images, videos, fixed_image, fixed_video, pinned) = match backend {
        Some(backend) => {
            let dir = &request.dir;
            let images = cache
                .upload_all(backend, dir, &request.images, &mut failures)
                .await;
            let videos = cache
                .upload_all(backend, dir, &request.videos, &mut failures)
                .await;
            let fixed_image = match &request.fixed_image {
                Some(value) => cache.upload_fixed(backend, dir, value, &mut failures).await,
                None => None,
            };
            let fixed_video = match &request.fixed_video {
                Some(value) => cache.upload_fixed(backend, dir, value, &mut failures).await,
                None => None,
            };
            let pinned = cache
                .upload_pinned(backend, dir, &request.pinned_images, &mut failures)
                .await;
            (images, videos, fixed_image, fixed_video, pinned)
        }
        None => (
            request.images.clone(),
            request.videos.clone(),
            request.fixed_image.clone().filter(|s| !s.trim().is_empty()),
            request.fixed_video.clone().filter(|s| !s.trim().is_empty()),
            request.pinned_images.clone(),
        ),
    };

    if !failures.is_empty() {
        warn!(
            "{} uploads failed; the batch will use fewer files than selected",
            failures.len()
        );
    }

    let counts = AssetCounts::new(images.len(), videos.len(), prompts.len());
    let mode = select_mode(request.mode, counts);
    info!(
        "Mode {}: {} images, {} videos, {} prompts",
        mode,
        counts.images,
        counts.videos,
        counts.prompts
    );

    let defaults = SlotDefaults {
        prompt: None,
        image: fixed_image,
        video: fixed_video,
        pinned,
    };
    let expansion = expand(&ExpansionInput {
        mode,
        images: &images,
        videos: &videos,
        prompts: &prompts,
        defaults: &defaults,
        image_nodes: request.template.count(FieldKind::Image),
    })?;
    let payloads = PayloadBuilder::new(&request.config, &request.template, &request.editor)
        .build_all(&expansion, &defaults)?;

    Ok(PreparedBatch {
        mode,
        counts,
        payloads,
        dropped_uploads: failures.into_iter().map(|(name, _)| name).collect(),
        fell_back: expansion.fell_back,
    })
}
