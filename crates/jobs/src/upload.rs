use hub_client::{HubError, TaskBackend};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};
use workflow::AssetKind;

/// Remote references of files uploaded during one run, keyed by file name
#[derive(Debug, Default)]
pub struct UploadCache {
    uploaded: HashMap<String, String>,
}

impl UploadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.uploaded.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }

    /// Upload `dir/name` unless a file of that name was already uploaded
    pub async fn upload(
        &mut self,
        backend: &dyn TaskBackend,
        dir: &Path,
        name: &str,
    ) -> Result<String, HubError> {
        if let Some(reference) = self.uploaded.get(name) {
            info!("{} already uploaded as {}", name, reference);
            return Ok(reference.clone());
        }

        let path = dir.join(name);
        if !path.is_file() {
            return Err(HubError::MissingFile(path));
        }

        let reference = backend.upload(&path, AssetKind::upload_type(name)).await?;
        info!("Uploaded {} as {}", name, reference);
        self.uploaded.insert(name.to_string(), reference.clone());
        Ok(reference)
    }

    /// Upload every file in order, dropping the ones that fail
    pub async fn upload_all(
        &mut self,
        backend: &dyn TaskBackend,
        dir: &Path,
        names: &[String],
        failures: &mut Vec<(String, String)>,
    ) -> Vec<String> {
        let mut references = Vec::with_capacity(names.len());
        for name in names {
            match self.upload(backend, dir, name).await {
                Ok(reference) => references.push(reference),
                Err(e) => {
                    warn!("Upload of {} failed, dropping it: {}", name, e);
                    failures.push((name.clone(), e.to_string()));
                }
            }
        }
        references
    }

    /// Upload each comma-separated part of a fixed slot value
    ///
    /// The joined references are returned only when every part uploaded.
    pub async fn upload_fixed(
        &mut self,
        backend: &dyn TaskBackend,
        dir: &Path,
        value: &str,
        failures: &mut Vec<(String, String)>,
    ) -> Option<String> {
        let parts: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if parts.is_empty() {
            return None;
        }

        let before = failures.len();
        let references = self.upload_all(backend, dir, &parts, failures).await;
        if failures.len() > before {
            warn!("Fixed value {} not used, some parts failed to upload", value);
            return None;
        }
        Some(references.join(","))
    }

    /// Upload pinned images keyed by image field position
    ///
    /// Nothing is pinned unless every file uploaded.
    pub async fn upload_pinned(
        &mut self,
        backend: &dyn TaskBackend,
        dir: &Path,
        pinned: &BTreeMap<usize, String>,
        failures: &mut Vec<(String, String)>,
    ) -> BTreeMap<usize, String> {
        let mut references = BTreeMap::new();
        let before = failures.len();
        for (position, name) in pinned {
            match self.upload(backend, dir, name).await {
                Ok(reference) => {
                    references.insert(*position, reference);
                }
                Err(e) => {
                    warn!("Upload of pinned {} failed: {}", name, e);
                    failures.push((name.clone(), e.to_string()));
                }
            }
        }
        if failures.len() > before {
            warn!("Pinned images not used, some failed to upload");
            references.clear();
        }
        references
    }
}
