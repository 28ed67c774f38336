//! Request payload construction

use crate::config::{ApiConfig, WebappId};
use crate::expand::{Expansion, ExpansionItem, SlotDefaults};
use crate::mode::BatchMode;
use crate::template::{EditorValues, FieldKey, FieldKind, InterfaceField, InterfaceTemplate};
use crate::ExpandError;
use serde::{Deserialize, Serialize};

/// One node of an outgoing `nodeInfoList`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadNode {
    pub node_id: String,
    pub field_name: String,
    pub field_value: String,
    pub description: String,
}

impl PayloadNode {
    fn new(field: &InterfaceField, value: &str) -> Self {
        Self {
            node_id: field.code.clone(),
            field_name: field.field_name.clone(),
            field_value: value.to_string(),
            description: field.name.clone(),
        }
    }
}

/// Body of a task creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub webapp_id: WebappId,
    pub api_key: String,
    pub node_info_list: Vec<PayloadNode>,
}

impl RequestPayload {
    /// Copy with the API key cut to its first four characters, for logs and plans
    pub fn redacted(&self) -> Self {
        let head: String = self.api_key.chars().take(4).collect();
        Self {
            api_key: format!("{}...", head),
            ..self.clone()
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&PayloadNode> {
        self.node_info_list.iter().find(|n| n.node_id == node_id)
    }
}

/// Builds payloads from a template, editor values and batch items
pub struct PayloadBuilder<'a> {
    template: &'a InterfaceTemplate,
    editor: &'a EditorValues,
    webapp_id: WebappId,
    api_key: String,
    text_slot: Option<FieldKey>,
    image_slot: Option<FieldKey>,
    video_slot: Option<FieldKey>,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(config: &ApiConfig, template: &'a InterfaceTemplate, editor: &'a EditorValues) -> Self {
        Self {
            template,
            editor,
            webapp_id: config.webapp_id.clone(),
            api_key: config.api_key.clone(),
            text_slot: template.slot(FieldKind::Text).map(InterfaceField::key),
            image_slot: template.slot(FieldKind::Image).map(InterfaceField::key),
            video_slot: template.slot(FieldKind::Video).map(InterfaceField::key),
        }
    }

    fn is_slot(&self, field: &InterfaceField) -> bool {
        let key = field.key();
        [&self.text_slot, &self.image_slot, &self.video_slot]
            .into_iter()
            .any(|slot| slot.as_ref() == Some(&key))
    }

    /// Value of a slot no item or fixed file sets
    ///
    /// Editor values of the image and video slots name local files, so those
    /// slots only ever carry uploaded references or the template value.
    fn slot_fallback<'f>(&'f self, field: &'f InterfaceField) -> &'f str {
        match field.kind {
            FieldKind::Image | FieldKind::Video => field.default_value.as_str(),
            _ => self.editor.value_for(field),
        }
    }

    fn slot_node(&self, kind: FieldKind, value: Option<&str>) -> Option<PayloadNode> {
        let field = self.template.slot(kind)?;
        let value = value.unwrap_or_else(|| self.slot_fallback(field));
        Some(PayloadNode::new(field, value))
    }

    /// Payload for one batch item
    ///
    /// Non-slot fields come first in template order, then the text, image and
    /// video slots. The second and later image fields take the item's
    /// per-field images when it has them.
    pub fn build(&self, item: &ExpansionItem) -> RequestPayload {
        let mut nodes = Vec::with_capacity(self.template.len());
        let mut image_position = 0;
        for field in self.template.fields() {
            if field.kind == FieldKind::Image {
                image_position += 1;
            }
            if self.is_slot(field) {
                continue;
            }
            let per_field = match field.kind {
                FieldKind::Image if image_position >= 2 => item
                    .extra_images
                    .get(image_position - 2)
                    .and_then(|v| v.as_deref()),
                _ => None,
            };
            let value = per_field.unwrap_or_else(|| self.editor.value_for(field));
            nodes.push(PayloadNode::new(field, value));
        }

        nodes.extend(self.slot_node(FieldKind::Text, item.prompt.as_deref()));
        nodes.extend(self.slot_node(FieldKind::Image, item.image.as_deref()));
        nodes.extend(self.slot_node(FieldKind::Video, item.video.as_deref()));

        self.payload(nodes)
    }

    /// Payload in template order with editor values, slots taking the fixed
    /// uploaded references when present
    pub fn single_default(&self, defaults: &SlotDefaults) -> RequestPayload {
        let nodes = self
            .template
            .fields()
            .iter()
            .map(|f| {
                let key = Some(f.key());
                let fixed = if key == self.image_slot {
                    defaults.image.as_deref()
                } else if key == self.video_slot {
                    defaults.video.as_deref()
                } else {
                    None
                };
                let fallback = if self.is_slot(f) {
                    self.slot_fallback(f)
                } else {
                    self.editor.value_for(f)
                };
                PayloadNode::new(f, fixed.unwrap_or(fallback))
            })
            .collect();
        self.payload(nodes)
    }

    /// Payloads for a whole expansion
    pub fn build_all(
        &self,
        expansion: &Expansion,
        defaults: &SlotDefaults,
    ) -> Result<Vec<RequestPayload>, ExpandError> {
        if expansion.fell_back {
            return Ok(vec![self.single_default(defaults)]);
        }
        if self.image_slot.is_none() && iterates_images(expansion.mode) {
            return Err(ExpandError::NoImageSlot(expansion.mode.code()));
        }
        Ok(expansion.items.iter().map(|item| self.build(item)).collect())
    }

    fn payload(&self, node_info_list: Vec<PayloadNode>) -> RequestPayload {
        RequestPayload {
            webapp_id: self.webapp_id.clone(),
            api_key: self.api_key.clone(),
            node_info_list,
        }
    }
}

fn iterates_images(mode: BatchMode) -> bool {
    matches!(
        mode,
        BatchMode::ImagesFixedPrompt
            | BatchMode::Zip
            | BatchMode::Cartesian
            | BatchMode::SlidingPairs
            | BatchMode::SlidingTriples
            | BatchMode::PureImages
            | BatchMode::FixedOnePlus
            | BatchMode::FixedTwoPlus
            | BatchMode::NodeWindows
            | BatchMode::PinnedNodes
    )
}
