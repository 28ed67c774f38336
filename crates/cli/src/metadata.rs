//! `.safetensors` header metadata export

use anyhow::{Context, Result};
use safetensors::SafeTensors;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Keys that usually carry a LoRA's trigger words
const TRIGGER_KEYS: &[&str] = &[
    "_i2i.trigger_words",
    "ss_tag_frequency",
    "ss_additional_metadata",
    "activation_text",
    "trigger_words",
    "ss_word",
];

/// The `__metadata__` table of a `.safetensors` file, if it has one
pub fn read_metadata(path: &Path) -> Result<Option<Map<String, Value>>> {
    let buffer =
        std::fs::read(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (_, metadata) =
        SafeTensors::read_metadata(&buffer).context("Invalid safetensors header")?;
    Ok(metadata.metadata().as_ref().map(|table| {
        table
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect()
    }))
}

/// Report text for one file
pub fn render_report(file_name: &str, metadata: Option<&Map<String, Value>>) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "--- LoRA file: {} ---\n", file_name);

    let Some(metadata) = metadata else {
        let _ = writeln!(text, "No embedded metadata found.");
        return text;
    };

    let _ = writeln!(text, "### Raw metadata:");
    let _ = writeln!(
        text,
        "{}",
        serde_json::to_string_pretty(metadata).unwrap_or_default()
    );
    let _ = writeln!(text, "\n{}", "=".repeat(50));
    let _ = writeln!(text, "### Likely trigger words:");

    let mut found = false;
    for key in TRIGGER_KEYS {
        if let Some(value) = metadata.get(*key) {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(text, "[{}]: {}", key, value);
            found = true;
        }
    }
    if !found {
        let _ = writeln!(
            text,
            "No trigger words under the usual keys; check the raw metadata above."
        );
    }
    text
}

/// Files written and files skipped by an export
#[derive(Debug, Default)]
pub struct MetadataExport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<(String, String)>,
}

/// Write `<stem>_metadata.txt` next to every `.safetensors` file in `dir`
pub fn export_dir(dir: &Path) -> Result<MetadataExport> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"))
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();

    let mut export = MetadataExport::default();
    if files.is_empty() {
        warn!("No .safetensors files in {}", dir.display());
        return Ok(export);
    }

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let metadata = match read_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("Cannot read {}: {:#}", file_name, e);
                export.skipped.push((file_name, format!("{:#}", e)));
                continue;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let output = dir.join(format!("{}_metadata.txt", stem));
        std::fs::write(&output, render_report(&file_name, metadata.as_ref()))
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!("Metadata of {} saved to {}", file_name, output.display());
        export.written.push(output);
    }

    Ok(export)
}
