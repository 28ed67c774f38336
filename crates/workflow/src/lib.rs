//! Workflow model for RunningHub batch runs
//!
//! Parses API configurations, scans local assets, and expands a selection of
//! images, videos and prompts into request payloads according to a batch mode.

use thiserror::Error;

pub mod assets;
pub mod config;
pub mod expand;
pub mod history;
pub mod mode;
pub mod payload;
pub mod prompts;
pub mod template;

pub use assets::{
    fixed_prefix_images, natural_sort_key, scan_directory, AssetKind, PinnedImages, ScannedAssets,
};
pub use config::{load_config_file, parse_config, ApiConfig, NodeInfo, WebappId};
pub use expand::{expand, node_window_stride, Expansion, ExpansionInput, ExpansionItem, SlotDefaults};
pub use history::ConfigHistory;
pub use mode::{recommend, select_mode, AssetCounts, BatchMode};
pub use payload::{PayloadBuilder, PayloadNode, RequestPayload};
pub use prompts::extract_prompts;
pub use template::{EditorValues, FieldKey, FieldKind, InterfaceField, InterfaceTemplate};

/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
    #[error("no API URL and/or JSON request body found in curl text")]
    CurlNotRecognized,
    #[error("configuration is missing required fields: {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),
    #[error("invalid node in nodeInfoList: {0}")]
    InvalidNode(String),
    #[error("duplicate interface field {node_id}:{field_name}")]
    DuplicateField { node_id: String, field_name: String },
}

/// Errors raised while expanding a selection into payloads
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpandError {
    #[error("{mode} requires exactly {expected} fixed image(s) in the image slot, found {found}")]
    FixedPrefix {
        mode: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("the interface template has no image field, {0} cannot run")]
    NoImageSlot(&'static str),
    #[error("{mode} needs at least 2 image fields in the interface template, found {found}")]
    ImageNodes { mode: &'static str, found: usize },
    #[error("{mode} needs at least one pinned image and a free field among {nodes} image fields, found {pinned} pinned")]
    PinnedNodes {
        mode: &'static str,
        nodes: usize,
        pinned: usize,
    },
}

/// Top-level workflow error
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error("unknown batch mode: {0}")]
    UnknownMode(String),
    #[error("invalid field assignment '{0}', expected CODE=VALUE or CODE:FIELD=VALUE")]
    InvalidAssignment(String),
    #[error("unknown interface field: {0}")]
    UnknownField(String),
    #[error("node {0} has several fields, use CODE:FIELD to pick one")]
    AmbiguousField(String),
}
