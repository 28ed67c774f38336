//! Interface template: the typed, ordered list of workflow parameters

use crate::config::{ApiConfig, NodeInfo};
use crate::{ConfigError, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Kind of a workflow parameter, derived from its wire `fieldName`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Value,
    Text,
    Select,
    Image,
    Video,
}

impl FieldKind {
    pub fn from_field_name(field_name: &str) -> Self {
        match field_name.to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "text" | "prompt" => Self::Text,
            "select" => Self::Select,
            _ => Self::Value,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => write!(f, "value"),
            Self::Text => write!(f, "text"),
            Self::Select => write!(f, "select"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Stable identity of a field inside a template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub node_id: String,
    pub field_name: String,
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.field_name)
    }
}

/// One parameter of the remote workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceField {
    /// Node id
    pub code: String,
    /// Human-readable description
    pub name: String,
    /// Wire field name, echoed verbatim in payloads
    pub field_name: String,
    pub kind: FieldKind,
    pub default_value: String,
}

impl InterfaceField {
    pub fn key(&self) -> FieldKey {
        FieldKey {
            node_id: self.code.clone(),
            field_name: self.field_name.clone(),
        }
    }
}

impl From<&NodeInfo> for InterfaceField {
    fn from(node: &NodeInfo) -> Self {
        Self {
            code: node.node_id.clone(),
            name: node.description.clone(),
            field_name: node.field_name.clone(),
            kind: FieldKind::from_field_name(&node.field_name),
            default_value: node.field_value.clone(),
        }
    }
}

/// Ordered list of interface fields, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceTemplate {
    fields: Vec<InterfaceField>,
}

impl InterfaceTemplate {
    /// Build a template from wire nodes, rejecting duplicate fields
    pub fn from_nodes(nodes: &[NodeInfo]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(nodes.len());
        for node in nodes {
            let field = InterfaceField::from(node);
            if !seen.insert(field.key()) {
                return Err(ConfigError::DuplicateField {
                    node_id: field.code,
                    field_name: field.field_name,
                });
            }
            fields.push(field);
        }
        Ok(Self { fields })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ConfigError> {
        Self::from_nodes(&config.node_info_list)
    }

    pub fn fields(&self) -> &[InterfaceField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First field of the given kind; this is the slot batch items fill
    pub fn slot(&self, kind: FieldKind) -> Option<&InterfaceField> {
        self.fields.iter().find(|f| f.kind == kind)
    }

    /// Number of fields of a kind
    pub fn count(&self, kind: FieldKind) -> usize {
        self.fields.iter().filter(|f| f.kind == kind).count()
    }

    pub fn find(&self, key: &FieldKey) -> Option<&InterfaceField> {
        self.fields.iter().find(|f| &f.key() == key)
    }

    /// Resolve `CODE` or `CODE:FIELD` to a field key
    pub fn resolve(&self, code: &str) -> Result<FieldKey, WorkflowError> {
        if let Some((node_id, field_name)) = code.split_once(':') {
            let key = FieldKey {
                node_id: node_id.trim().to_string(),
                field_name: field_name.trim().to_string(),
            };
            return self
                .find(&key)
                .map(|f| f.key())
                .ok_or_else(|| WorkflowError::UnknownField(code.to_string()));
        }

        let mut matches = self.fields.iter().filter(|f| f.code == code.trim());
        match (matches.next(), matches.next()) {
            (Some(field), None) => Ok(field.key()),
            (Some(_), Some(_)) => Err(WorkflowError::AmbiguousField(code.to_string())),
            (None, _) => Err(WorkflowError::UnknownField(code.to_string())),
        }
    }
}

/// Values the user edited on top of the template defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorValues {
    values: BTreeMap<FieldKey, String>,
}

impl EditorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: FieldKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Apply a `CODE=VALUE` or `CODE:FIELD=VALUE` assignment
    pub fn apply_assignment(
        &mut self,
        template: &InterfaceTemplate,
        assignment: &str,
    ) -> Result<FieldKey, WorkflowError> {
        let (code, value) = assignment
            .split_once('=')
            .ok_or_else(|| WorkflowError::InvalidAssignment(assignment.to_string()))?;
        if code.trim().is_empty() {
            return Err(WorkflowError::InvalidAssignment(assignment.to_string()));
        }
        let key = template.resolve(code)?;
        self.set(key.clone(), value);
        Ok(key)
    }

    /// Explicitly edited, non-empty value of a field
    pub fn get(&self, key: &FieldKey) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Edited value when present and non-empty, otherwise the template default
    pub fn value_for<'a>(&'a self, field: &'a InterfaceField) -> &'a str {
        match self.values.get(&field.key()) {
            Some(v) if !v.is_empty() => v,
            _ => &field.default_value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
