//! Expansion of a selection into batch items

use crate::mode::BatchMode;
use crate::ExpandError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Values a slot takes when a batch item does not set it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefaults {
    /// Prompt to use instead of the text slot's editor value
    pub prompt: Option<String>,
    /// Uploaded fixed image reference(s), comma-joined
    pub image: Option<String>,
    /// Uploaded fixed video reference
    pub video: Option<String>,
    /// Uploaded pinned images by image field position (1-based)
    #[serde(default)]
    pub pinned: BTreeMap<usize, String>,
}

impl SlotDefaults {
    /// Fixed image entries, in order
    pub fn image_parts(&self) -> Vec<&str> {
        self.image
            .as_deref()
            .map(split_references)
            .unwrap_or_default()
    }
}

/// Values one request puts into the active slots
///
/// `None` leaves the slot at its template value (the editor value for the
/// text slot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionItem {
    pub prompt: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
    /// Values for the second and later image fields, in template order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_images: Vec<Option<String>>,
}

impl ExpansionItem {
    fn new(prompt: Option<String>, image: Option<String>, video: Option<String>) -> Self {
        Self {
            prompt,
            image,
            video,
            extra_images: Vec::new(),
        }
    }

    /// Item filling one image field per entry of `nodes`
    fn per_node(mut nodes: Vec<Option<String>>, prompt: Option<String>, video: Option<String>) -> Self {
        let extra_images = if nodes.len() > 1 {
            nodes.split_off(1)
        } else {
            Vec::new()
        };
        Self {
            prompt,
            image: nodes.into_iter().next().flatten(),
            video,
            extra_images,
        }
    }
}

/// Uploaded references and prompts to expand
#[derive(Debug, Clone, Copy)]
pub struct ExpansionInput<'a> {
    pub mode: BatchMode,
    pub images: &'a [String],
    pub videos: &'a [String],
    pub prompts: &'a [String],
    pub defaults: &'a SlotDefaults,
    /// Number of image fields in the template
    pub image_nodes: usize,
}

/// Result of expanding a selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expansion {
    pub mode: BatchMode,
    pub items: Vec<ExpansionItem>,
    /// The mode produced nothing and the single default request is used
    pub fell_back: bool,
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Stride of the per-node window for a template with `nodes` image fields
pub fn node_window_stride(nodes: usize) -> usize {
    match nodes {
        0..=2 => 1,
        3 => 2,
        n => n,
    }
}

/// Expand the input into ordered batch items according to its mode
pub fn expand(input: &ExpansionInput<'_>) -> Result<Expansion, ExpandError> {
    let ExpansionInput {
        mode,
        images,
        videos,
        prompts,
        defaults,
        image_nodes,
    } = *input;

    let prompt_default = match prompts {
        [only] => Some(only.clone()),
        _ => defaults.prompt.clone(),
    };
    let image_default = defaults.image.clone();
    let video_default = defaults.video.clone();

    let per_prompt = || -> Vec<ExpansionItem> {
        let image = match images {
            [only] => Some(only.clone()),
            _ => image_default.clone(),
        };
        let prompt_values: Vec<Option<String>> = if prompts.len() > 1 {
            prompts.iter().cloned().map(Some).collect()
        } else {
            vec![prompt_default.clone()]
        };
        prompt_values
            .into_iter()
            .map(|prompt| ExpansionItem::new(prompt, image.clone(), video_default.clone()))
            .collect()
    };

    let items: Vec<ExpansionItem> = match mode {
        BatchMode::Single => per_prompt().into_iter().take(1).collect(),
        BatchMode::PromptsOnly | BatchMode::SingleImagePrompts => per_prompt(),
        BatchMode::Zip => images
            .iter()
            .zip(prompts)
            .map(|(image, prompt)| {
                ExpansionItem::new(
                    Some(prompt.clone()),
                    Some(image.clone()),
                    video_default.clone(),
                )
            })
            .collect(),
        BatchMode::ImagesFixedPrompt => images
            .iter()
            .map(|image| {
                ExpansionItem::new(
                    prompt_default.clone(),
                    Some(image.clone()),
                    video_default.clone(),
                )
            })
            .collect(),
        BatchMode::VideosFixed => videos
            .iter()
            .map(|video| {
                ExpansionItem::new(
                    prompt_default.clone(),
                    image_default.clone(),
                    Some(video.clone()),
                )
            })
            .collect(),
        BatchMode::PureImages => images
            .iter()
            .map(|image| ExpansionItem::new(None, Some(image.clone()), None))
            .collect(),
        BatchMode::PureVideos => videos
            .iter()
            .map(|video| ExpansionItem::new(None, None, Some(video.clone())))
            .collect(),
        BatchMode::SlidingPairs | BatchMode::SlidingTriples => {
            let (window, stride) = mode.window().unwrap_or((2, 1));
            sliding_windows(images, window, stride)
                .into_iter()
                .map(|image| {
                    ExpansionItem::new(prompt_default.clone(), Some(image), video_default.clone())
                })
                .collect()
        }
        BatchMode::FixedOnePlus | BatchMode::FixedTwoPlus => {
            let expected = mode.fixed_prefix_len().unwrap_or(1);
            let prefix = defaults.image_parts();
            if prefix.len() != expected {
                return Err(ExpandError::FixedPrefix {
                    mode: mode.code(),
                    expected,
                    found: prefix.len(),
                });
            }
            let joined = prefix.join(",");
            images
                .iter()
                .filter(|image| !prefix.contains(&image.as_str()))
                .map(|image| {
                    ExpansionItem::new(
                        prompt_default.clone(),
                        Some(format!("{},{}", joined, image)),
                        video_default.clone(),
                    )
                })
                .collect()
        }
        BatchMode::Cartesian => {
            if images.is_empty() || prompts.is_empty() {
                warn!(
                    "Cartesian mode needs images and prompts (got {} and {}), using the single default request",
                    images.len(),
                    prompts.len()
                );
                Vec::new()
            } else {
                images
                    .iter()
                    .flat_map(|image| {
                        let video = video_default.clone();
                        prompts.iter().map(move |prompt| {
                            ExpansionItem::new(
                                Some(prompt.clone()),
                                Some(image.clone()),
                                video.clone(),
                            )
                        })
                    })
                    .collect()
            }
        }
        BatchMode::NodeWindows => {
            if image_nodes < 2 {
                return Err(ExpandError::ImageNodes {
                    mode: mode.code(),
                    found: image_nodes,
                });
            }
            images
                .windows(image_nodes)
                .step_by(node_window_stride(image_nodes))
                .map(|window| {
                    ExpansionItem::per_node(
                        window.iter().cloned().map(Some).collect(),
                        prompt_default.clone(),
                        video_default.clone(),
                    )
                })
                .collect()
        }
        BatchMode::PinnedNodes => {
            if image_nodes < 2 {
                return Err(ExpandError::ImageNodes {
                    mode: mode.code(),
                    found: image_nodes,
                });
            }
            let pinned: BTreeMap<usize, &String> = defaults
                .pinned
                .iter()
                .filter(|(position, _)| (1..=image_nodes).contains(*position))
                .map(|(position, reference)| (*position, reference))
                .collect();
            let free = (1..=image_nodes).find(|p| !pinned.contains_key(p));
            let free = match free {
                Some(free) if !pinned.is_empty() => free,
                _ => {
                    return Err(ExpandError::PinnedNodes {
                        mode: mode.code(),
                        nodes: image_nodes,
                        pinned: pinned.len(),
                    })
                }
            };
            images
                .iter()
                .filter(|image| !pinned.values().any(|p| p == image))
                .map(|image| {
                    let mut nodes = vec![None; image_nodes];
                    for (position, reference) in &pinned {
                        nodes[position - 1] = Some((*reference).clone());
                    }
                    nodes[free - 1] = Some(image.clone());
                    ExpansionItem::per_node(nodes, prompt_default.clone(), video_default.clone())
                })
                .collect()
        }
    };

    if items.is_empty() {
        debug!("{} produced no items, falling back to the single default", mode.code());
        return Ok(Expansion {
            mode,
            items: vec![ExpansionItem::new(
                None,
                defaults.image.clone(),
                defaults.video.clone(),
            )],
            fell_back: true,
        });
    }

    debug!("{} expanded into {} items", mode.code(), items.len());
    Ok(Expansion {
        mode,
        items,
        fell_back: false,
    })
}

/// Comma-joined windows of `size` images advanced by `stride`; no partial tail
pub fn sliding_windows(images: &[String], size: usize, stride: usize) -> Vec<String> {
    if size == 0 || stride == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut start = 0;
    while start + size <= images.len() {
        windows.push(images[start..start + size].join(","));
        start += stride;
    }
    windows
}

fn split_references(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
