//! Local asset discovery

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "webm"];
const PROMPT_EXTENSIONS: &[&str] = &["json", "txt"];

/// Kind of a local asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Prompt,
}

impl AssetKind {
    /// Classify a file name by extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if PROMPT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Prompt)
        } else {
            None
        }
    }

    /// Upload `fileType`: videos are `video`, everything else is `image`
    pub fn upload_type(name: &str) -> &'static str {
        match Self::from_path(Path::new(name)) {
            Some(Self::Video) => "video",
            _ => "image",
        }
    }
}

/// Files found in a working directory, each list in natural order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedAssets {
    pub dir: PathBuf,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub prompt_files: Vec<String>,
}

impl ScannedAssets {
    pub fn total(&self) -> usize {
        self.images.len() + self.videos.len() + self.prompt_files.len()
    }
}

/// Scan a directory (non-recursive) for images, videos and prompt sources
pub fn scan_directory(dir: &Path) -> Result<ScannedAssets> {
    if !dir.is_dir() {
        anyhow::bail!("directory does not exist: {}", dir.display());
    }

    let mut assets = ScannedAssets {
        dir: dir.to_path_buf(),
        ..Default::default()
    };

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match AssetKind::from_path(path) {
            Some(AssetKind::Image) => assets.images.push(name),
            Some(AssetKind::Video) => assets.videos.push(name),
            Some(AssetKind::Prompt) => assets.prompt_files.push(name),
            None => {}
        }
    }

    for list in [
        &mut assets.images,
        &mut assets.videos,
        &mut assets.prompt_files,
    ] {
        list.sort_by(|a, b| natural_cmp(a, b));
    }

    tracing::debug!(
        "Scanned {}: {} images, {} videos, {} prompt files",
        dir.display(),
        assets.images.len(),
        assets.videos.len(),
        assets.prompt_files.len()
    );

    Ok(assets)
}

/// One chunk of a natural sort key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    Number(u128),
    Text(String),
}

/// Sort key treating digit runs as numbers, so `img2` sorts before `img10`
pub fn natural_sort_key(s: &str) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(KeyPart::Text(std::mem::take(&mut text)));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(number_part(&std::mem::take(&mut digits)));
            }
            text.extend(c.to_lowercase());
        }
    }
    if !digits.is_empty() {
        parts.push(number_part(&digits));
    }
    if !text.is_empty() {
        parts.push(KeyPart::Text(text));
    }
    parts
}

fn number_part(digits: &str) -> KeyPart {
    digits
        .parse()
        .map(KeyPart::Number)
        .unwrap_or_else(|_| KeyPart::Text(digits.to_string()))
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_sort_key(a)
        .cmp(&natural_sort_key(b))
        .then_with(|| a.cmp(b))
}

/// Images split by `#` / `##` / `###` name prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedImages {
    /// Pinned images by slot position (1-based)
    pub pinned: BTreeMap<u8, String>,
    /// Images without a pin prefix, in input order
    pub sequential: Vec<String>,
    /// Set when two files claim the same position; pinning is then disabled
    pub conflict: Option<String>,
}

impl PinnedImages {
    /// Pinned images joined in position order, as an image slot value
    pub fn prefix_value(&self) -> Option<String> {
        if self.pinned.is_empty() {
            return None;
        }
        Some(self.pinned.values().cloned().collect::<Vec<_>>().join(","))
    }
}

/// Split images into pinned (`#name` → 1, `##name` → 2, `###name` → 3) and sequential
pub fn fixed_prefix_images(images: &[String]) -> PinnedImages {
    let mut result = PinnedImages::default();

    for name in images {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let position = stem.chars().take(3).take_while(|c| *c == '#').count() as u8;

        if position == 0 {
            result.sequential.push(name.clone());
            continue;
        }
        if let Some(existing) = result.pinned.get(&position) {
            return PinnedImages {
                pinned: BTreeMap::new(),
                sequential: images.to_vec(),
                conflict: Some(format!(
                    "both {} and {} are pinned to image position {}",
                    existing, name, position
                )),
            };
        }
        result.pinned.insert(position, name.clone());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["img10.png", "img2.png", "IMG1.png", "img2a.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["IMG1.png", "img2.png", "img2a.png", "img10.png"]);
    }

    #[test]
    fn test_scan_directory_classifies_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b10.png", "b2.JPG", "clip.mp4", "prompts.json", "notes.txt", "x.bin"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let assets = scan_directory(dir.path()).unwrap();
        assert_eq!(assets.images, vec!["b2.JPG", "b10.png"]);
        assert_eq!(assets.videos, vec!["clip.mp4"]);
        assert_eq!(assets.prompt_files, vec!["notes.txt", "prompts.json"]);
        assert_eq!(assets.total(), 5);
    }

    #[test]
    fn test_scan_missing_directory_fails() {
        assert!(scan_directory(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_upload_type() {
        assert_eq!(AssetKind::upload_type("a.MOV"), "video");
        assert_eq!(AssetKind::upload_type("a.png"), "image");
    }

    #[test]
    fn test_fixed_prefix_images() {
        let images: Vec<String> = ["##b.png", "#a.png", "c.png", "d.png"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pinned = fixed_prefix_images(&images);
        assert_eq!(pinned.prefix_value().unwrap(), "#a.png,##b.png");
        assert_eq!(pinned.sequential, vec!["c.png", "d.png"]);
        assert!(pinned.conflict.is_none());
    }

    #[test]
    fn test_fixed_prefix_conflict() {
        let images: Vec<String> = ["#a.png", "#b.png", "c.png"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pinned = fixed_prefix_images(&images);
        assert!(pinned.conflict.is_some());
        assert!(pinned.pinned.is_empty());
        assert_eq!(pinned.sequential.len(), 3);
    }
}
