//! API configuration loading
//!
//! A configuration is either raw JSON (`{url, webappId, apiKey, nodeInfoList}`)
//! or the text of a curl command copied from the RunningHub API page.

use crate::ConfigError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

const REQUIRED_KEYS: [&str; 4] = ["url", "webappId", "apiKey", "nodeInfoList"];

/// Web application id, echoed back in the JSON type it was given in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebappId {
    Number(u64),
    Text(String),
}

impl fmt::Display for WebappId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One node of a workflow payload as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(deserialize_with = "scalar_string")]
    pub node_id: String,
    #[serde(deserialize_with = "scalar_string")]
    pub field_name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub field_value: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub description: String,
}

/// Loaded API configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Task creation endpoint
    pub url: String,
    pub webapp_id: WebappId,
    pub api_key: String,
    pub node_info_list: Vec<NodeInfo>,
    /// File the configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ApiConfig {
    /// API key reduced to its first and last four characters
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return format!("{}...", chars.iter().take(4).collect::<String>());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }

    /// File name of the source, if loaded from disk
    pub fn source_name(&self) -> Option<String> {
        self.source
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Read and parse a configuration file (JSON or curl text)
pub fn load_config_file(path: &Path) -> Result<ApiConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let mut config = parse_config(&text)?;
    config.source = Some(path.to_path_buf());
    Ok(config)
}

/// Parse configuration text
///
/// Valid JSON is taken as the configuration itself; anything else is treated
/// as a curl command from which the URL and JSON body are extracted.
pub fn parse_config(text: &str) -> Result<ApiConfig, ConfigError> {
    let raw = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(ConfigError::MissingKeys(REQUIRED_KEYS.to_vec())),
        Err(_) => parse_curl(text)?,
    };
    from_raw(raw)
}

fn parse_curl(text: &str) -> Result<Map<String, Value>, ConfigError> {
    let url = extract_url(text)?.ok_or(ConfigError::CurlNotRecognized)?;

    let body_re = Regex::new(
        r#"(?s)(?:--data-raw|--data-binary|--data|-d)\s+['"]\s*(\{.*\})\s*['"]"#,
    )?;
    let body = body_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| normalize_body(m.as_str()))
        .ok_or(ConfigError::CurlNotRecognized)?;

    let body: Value = serde_json::from_str(&body)?;
    let mut raw = Map::new();
    raw.insert("url".to_string(), Value::String(url));
    for key in ["webappId", "apiKey", "nodeInfoList"] {
        if let Some(v) = body.get(key) {
            raw.insert(key.to_string(), v.clone());
        }
    }
    Ok(raw)
}

fn extract_url(text: &str) -> Result<Option<String>, ConfigError> {
    let patterns = [
        r#"(?:POST|GET|PUT)\s+['"](https?://[^'"]+)['"]"#,
        r#"--url\s+['"]?(https?://[^\s'"]+)"#,
        r#"(https?://[^\s'"]+)"#,
    ];
    for pattern in patterns {
        let re = Regex::new(pattern)?;
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            return Ok(Some(m.as_str().to_string()));
        }
    }
    Ok(None)
}

// Copying curl text out of a browser leaves shell line continuations and
// non-breaking spaces inside the body.
fn normalize_body(body: &str) -> String {
    body.replace("\\\r\n", "")
        .replace("\\\n", "")
        .replace(['\u{a0}', '\u{3000}'], " ")
        .trim()
        .to_string()
}

fn from_raw(raw: Map<String, Value>) -> Result<ApiConfig, ConfigError> {
    let missing: Vec<&'static str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| raw.get(*key).map_or(true, |v| !is_truthy(v)))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingKeys(missing));
    }

    let url = scalar_to_string(&raw["url"]);
    let api_key = scalar_to_string(&raw["apiKey"]);
    let webapp_id: WebappId = serde_json::from_value(raw["webappId"].clone())
        .map_err(|_| ConfigError::MissingKeys(vec!["webappId"]))?;
    let node_info_list: Vec<NodeInfo> = serde_json::from_value(raw["nodeInfoList"].clone())
        .map_err(|e| ConfigError::InvalidNode(e.to_string()))?;

    Ok(ApiConfig {
        url,
        webapp_id,
        api_key,
        node_info_list,
        source: None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
            "expected a string, number or boolean",
        )),
        other => Ok(scalar_to_string(&other)),
    }
}
