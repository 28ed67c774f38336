//! Prompt extraction from JSON and text files

use crate::template::InterfaceField;
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Marker separating prompt batches inside a text file
const BATCH_MARKER: &str = r"(?m)^\s*=== 组合提示词 - NO\.\s*\d+\s*===\s*";

/// Extract prompts from the given files, in file order, dropping empties
///
/// `text_slot` is the template's text field; JSON payload documents are
/// searched for nodes with its node id. Files that fail to parse are logged
/// and skipped.
pub fn extract_prompts(
    dir: &Path,
    files: &[String],
    text_slot: Option<&InterfaceField>,
) -> Vec<String> {
    let mut prompts = Vec::new();

    for name in files {
        let path = dir.join(name);
        let result = if name.to_lowercase().ends_with(".txt") {
            prompts_from_text_file(&path)
        } else {
            match text_slot {
                Some(slot) => prompts_from_json_file(&path, &slot.code),
                None => {
                    warn!("No text field in the template, skipping prompts in {}", name);
                    continue;
                }
            }
        };

        match result {
            Ok(found) => prompts.extend(found),
            Err(e) => warn!("Failed to read prompts from {}: {:#}", name, e),
        }
    }

    prompts.retain(|p| !p.trim().is_empty());
    if !files.is_empty() {
        info!("Extracted {} prompts from {} files", prompts.len(), files.len());
    }
    prompts
}

fn prompts_from_json_file(path: &Path, text_node_id: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data: Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(prompts_from_json(&data, text_node_id))
}

/// Prompts from a parsed JSON document
///
/// Accepts an array of `{prompt}` objects, payload documents with a
/// `nodeInfoList`, or an array of strings.
pub fn prompts_from_json(data: &Value, text_node_id: &str) -> Vec<String> {
    if let Value::Array(items) = data {
        if !items.is_empty()
            && items
                .iter()
                .all(|item| item.as_object().is_some_and(|o| o.contains_key("prompt")))
        {
            return items
                .iter()
                .filter_map(|item| value_text(&item["prompt"]))
                .collect();
        }
        if !items.is_empty() && items.iter().all(Value::is_string) {
            return items.iter().filter_map(value_text).collect();
        }
    }

    let documents: Vec<&Value> = match data {
        Value::Object(_) => vec![data],
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        _ => Vec::new(),
    };

    documents
        .into_iter()
        .filter_map(|doc| doc.get("nodeInfoList").and_then(Value::as_array))
        .flatten()
        .filter(|node| node.get("nodeId").and_then(value_text).as_deref() == Some(text_node_id))
        .filter_map(|node| node.get("fieldValue").and_then(value_text))
        .collect()
}

fn prompts_from_text_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    prompts_from_text(&text)
}

/// Split text on batch markers; without markers the whole text is one prompt
pub fn prompts_from_text(text: &str) -> Result<Vec<String>> {
    let marker = Regex::new(BATCH_MARKER)?;
    Ok(marker
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FieldKind;
    use serde_json::json;

    fn text_field() -> InterfaceField {
        InterfaceField {
            code: "52".to_string(),
            name: "prompt".to_string(),
            field_name: "text".to_string(),
            kind: FieldKind::Text,
            default_value: String::new(),
        }
    }

    #[test]
    fn test_prompt_objects() {
        let data = json!([{"prompt": "a"}, {"prompt": ""}, {"prompt": "b"}]);
        assert_eq!(prompts_from_json(&data, "52"), vec!["a", "b"]);
    }

    #[test]
    fn test_payload_documents() {
        let data = json!([
            {"nodeInfoList": [{"nodeId": "52", "fieldValue": "first"}, {"nodeId": "3", "fieldValue": "x"}]},
            {"nodeInfoList": [{"nodeId": "52", "fieldValue": "second"}]}
        ]);
        assert_eq!(prompts_from_json(&data, "52"), vec!["first", "second"]);

        let single = json!({"nodeInfoList": [{"nodeId": 52, "fieldValue": "only"}]});
        assert_eq!(prompts_from_json(&single, "52"), vec!["only"]);
    }

    #[test]
    fn test_string_array() {
        let data = json!(["one", "two"]);
        assert_eq!(prompts_from_json(&data, "52"), vec!["one", "two"]);
    }

    #[test]
    fn test_text_batches() {
        let text = "preamble\n=== 组合提示词 - NO. 1 ===\nfirst prompt\n\n=== 组合提示词 - NO. 2 ===\nsecond\n";
        let prompts = prompts_from_text(text).unwrap();
        assert_eq!(prompts, vec!["preamble", "first prompt", "second"]);

        assert_eq!(prompts_from_text("  just one  ").unwrap(), vec!["just one"]);
    }

    #[test]
    fn test_extract_prompts_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"["p1", "p2"]"#).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("c.txt"), "p3").unwrap();

        let files = vec!["a.json".to_string(), "bad.json".to_string(), "c.txt".to_string()];
        let prompts = extract_prompts(dir.path(), &files, Some(&text_field()));
        assert_eq!(prompts, vec!["p1", "p2", "p3"]);

        let without_slot = extract_prompts(dir.path(), &files, None);
        assert_eq!(without_slot, vec!["p3"]);
    }
}
