//! Batch modes and automatic mode selection

use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strategy for expanding selected assets into request payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// M0: one request with the current values
    #[default]
    Single,
    /// M1: one request per image, prompt and video fixed
    ImagesFixedPrompt,
    /// M2: one request per video, prompt and image fixed
    VideosFixed,
    /// M3: one request per prompt
    PromptsOnly,
    /// M4: images and prompts paired index by index
    Zip,
    /// M5: every image with every prompt
    Cartesian,
    /// M6: the sole image with each prompt
    SingleImagePrompts,
    /// M7a: overlapping image pairs, stride 1
    SlidingPairs,
    /// M7b: overlapping image triples, stride 2
    SlidingTriples,
    /// M8: one request per image, nothing else touched
    PureImages,
    /// M9: one request per video, nothing else touched
    PureVideos,
    /// M10: one fixed image followed by each remaining image
    FixedOnePlus,
    /// M11: two fixed images followed by each remaining image
    FixedTwoPlus,
    /// M12: one image per image field, windows over the image list
    NodeWindows,
    /// M13: pinned images stay in their image fields, each remaining image fills the first free one
    PinnedNodes,
}

impl BatchMode {
    pub fn all() -> &'static [BatchMode] {
        &[
            Self::Single,
            Self::ImagesFixedPrompt,
            Self::VideosFixed,
            Self::PromptsOnly,
            Self::Zip,
            Self::Cartesian,
            Self::SingleImagePrompts,
            Self::SlidingPairs,
            Self::SlidingTriples,
            Self::PureImages,
            Self::PureVideos,
            Self::FixedOnePlus,
            Self::FixedTwoPlus,
            Self::NodeWindows,
            Self::PinnedNodes,
        ]
    }

    /// Short code used on the command line and in results
    pub fn code(&self) -> &'static str {
        match self {
            Self::Single => "M0",
            Self::ImagesFixedPrompt => "M1",
            Self::VideosFixed => "M2",
            Self::PromptsOnly => "M3",
            Self::Zip => "M4",
            Self::Cartesian => "M5",
            Self::SingleImagePrompts => "M6",
            Self::SlidingPairs => "M7a",
            Self::SlidingTriples => "M7b",
            Self::PureImages => "M8",
            Self::PureVideos => "M9",
            Self::FixedOnePlus => "M10",
            Self::FixedTwoPlus => "M11",
            Self::NodeWindows => "M12",
            Self::PinnedNodes => "M13",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Single => "default single request",
            Self::ImagesFixedPrompt => "many images x fixed prompt/video",
            Self::VideosFixed => "many videos x fixed prompt/image",
            Self::PromptsOnly => "many prompts only",
            Self::Zip => "images and prompts 1:1",
            Self::Cartesian => "all images x all prompts",
            Self::SingleImagePrompts => "single image x many prompts",
            Self::SlidingPairs => "sliding window of 2 images, stride 1",
            Self::SlidingTriples => "sliding window of 3 images, stride 2",
            Self::PureImages => "many images only",
            Self::PureVideos => "many videos only",
            Self::FixedOnePlus => "1 fixed image + each remaining image",
            Self::FixedTwoPlus => "2 fixed images + each remaining image",
            Self::NodeWindows => "one image per image field, sliding over the list",
            Self::PinnedNodes => "pinned image fields + each remaining image",
        }
    }

    /// Window size and stride of the sliding-window modes
    pub fn window(&self) -> Option<(usize, usize)> {
        match self {
            Self::SlidingPairs => Some((2, 1)),
            Self::SlidingTriples => Some((3, 2)),
            _ => None,
        }
    }

    /// Number of fixed image entries the fixed-prefix modes require
    pub fn fixed_prefix_len(&self) -> Option<usize> {
        match self {
            Self::FixedOnePlus => Some(1),
            Self::FixedTwoPlus => Some(2),
            _ => None,
        }
    }

    /// Whether the counts give this mode something to iterate over
    pub fn fits(&self, counts: AssetCounts) -> bool {
        let AssetCounts { images, videos, prompts } = counts;
        match self {
            Self::Single | Self::Cartesian => true,
            Self::Zip => images > 0 && prompts > 0,
            Self::SingleImagePrompts | Self::PromptsOnly => prompts >= 1,
            Self::ImagesFixedPrompt
            | Self::PureImages
            | Self::FixedOnePlus
            | Self::FixedTwoPlus
            | Self::PinnedNodes => images >= 1,
            Self::NodeWindows => images >= 2,
            Self::VideosFixed | Self::PureVideos => videos >= 1,
            Self::SlidingPairs | Self::SlidingTriples => {
                self.window().is_some_and(|(w, _)| images >= w)
            }
        }
    }

    /// Modes the many-images rule leaves alone
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            Self::SlidingPairs
                | Self::SlidingTriples
                | Self::FixedOnePlus
                | Self::FixedTwoPlus
                | Self::Cartesian
                | Self::NodeWindows
                | Self::PinnedNodes
        )
    }

    /// Combination modes the fallback rule leaves alone
    pub fn is_combination(&self) -> bool {
        matches!(
            self,
            Self::Cartesian | Self::FixedOnePlus | Self::FixedTwoPlus | Self::PinnedNodes
        )
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}

impl FromStr for BatchMode {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|m| m.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| WorkflowError::UnknownMode(s.to_string()))
    }
}

/// Sizes of the selected asset lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCounts {
    pub images: usize,
    pub videos: usize,
    pub prompts: usize,
}

impl AssetCounts {
    pub fn new(images: usize, videos: usize, prompts: usize) -> Self {
        Self {
            images,
            videos,
            prompts,
        }
    }
}

/// Recommend a mode for the given counts
///
/// Rules are checked in a fixed order and the first match wins; `current`
/// survives the many-images and fallback rules when it is a sliding-window or
/// combination mode.
pub fn recommend(counts: AssetCounts, current: BatchMode) -> BatchMode {
    let AssetCounts {
        images: ni,
        videos: nv,
        prompts: np,
    } = counts;

    if ni > 1 && np > 1 && ni == np {
        BatchMode::Zip
    } else if ni == 1 && np > 1 {
        BatchMode::SingleImagePrompts
    } else if ni > 1 && np == 0 && nv == 0 {
        BatchMode::PureImages
    } else if nv > 1 && np == 0 && ni == 0 {
        BatchMode::PureVideos
    } else if ni > 1 && np <= 1 && nv <= 1 {
        if current.is_sticky() {
            current
        } else {
            BatchMode::ImagesFixedPrompt
        }
    } else if nv > 1 && np <= 1 {
        BatchMode::VideosFixed
    } else if np > 1 && ni <= 1 && nv <= 1 {
        BatchMode::PromptsOnly
    } else if current.is_combination() {
        current
    } else {
        BatchMode::Single
    }
}

/// Pick the mode for a run
///
/// A requested mode whose shape fits the counts is kept as is; otherwise the
/// recommendation decides, starting from the requested mode.
pub fn select_mode(requested: Option<BatchMode>, counts: AssetCounts) -> BatchMode {
    match requested {
        Some(mode) if mode.fits(counts) => mode,
        Some(mode) => {
            let chosen = recommend(counts, mode);
            tracing::warn!(
                "Mode {} does not fit {} images, {} videos, {} prompts; using {}",
                mode.code(),
                counts.images,
                counts.videos,
                counts.prompts,
                chosen.code()
            );
            chosen
        }
        None => recommend(counts, BatchMode::Single),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(ni: usize, nv: usize, np: usize) -> AssetCounts {
        AssetCounts::new(ni, nv, np)
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!("m4".parse::<BatchMode>().unwrap(), BatchMode::Zip);
        assert_eq!("M7b".parse::<BatchMode>().unwrap(), BatchMode::SlidingTriples);
        assert_eq!(" m11 ".parse::<BatchMode>().unwrap(), BatchMode::FixedTwoPlus);
        assert_eq!("m13".parse::<BatchMode>().unwrap(), BatchMode::PinnedNodes);
        assert!("m14".parse::<BatchMode>().is_err());
        assert_eq!(BatchMode::all().len(), 15);
    }

    #[test]
    fn test_recommend_precedence() {
        let m0 = BatchMode::Single;
        assert_eq!(recommend(counts(3, 0, 3), m0), BatchMode::Zip);
        assert_eq!(recommend(counts(1, 0, 4), m0), BatchMode::SingleImagePrompts);
        assert_eq!(recommend(counts(4, 0, 0), m0), BatchMode::PureImages);
        assert_eq!(recommend(counts(0, 3, 0), m0), BatchMode::PureVideos);
        assert_eq!(recommend(counts(4, 1, 1), m0), BatchMode::ImagesFixedPrompt);
        assert_eq!(recommend(counts(0, 3, 1), m0), BatchMode::VideosFixed);
        assert_eq!(recommend(counts(0, 0, 5), m0), BatchMode::PromptsOnly);
        assert_eq!(recommend(counts(1, 1, 1), m0), BatchMode::Single);
        assert_eq!(recommend(counts(3, 0, 2), m0), BatchMode::Single);
    }

    #[test]
    fn test_recommend_keeps_sticky_modes() {
        assert_eq!(
            recommend(counts(4, 0, 1), BatchMode::SlidingPairs),
            BatchMode::SlidingPairs
        );
        assert_eq!(
            recommend(counts(3, 0, 2), BatchMode::Cartesian),
            BatchMode::Cartesian
        );
        // Pure-images rule comes before the sticky check
        assert_eq!(
            recommend(counts(4, 0, 0), BatchMode::SlidingPairs),
            BatchMode::PureImages
        );
        assert_eq!(recommend(counts(1, 1, 1), BatchMode::Zip), BatchMode::Single);
        assert_eq!(
            recommend(counts(5, 0, 1), BatchMode::NodeWindows),
            BatchMode::NodeWindows
        );
        assert_eq!(
            recommend(counts(1, 1, 1), BatchMode::PinnedNodes),
            BatchMode::PinnedNodes
        );
    }

    #[test]
    fn test_select_mode_locks_fitting_request() {
        assert_eq!(
            select_mode(Some(BatchMode::SlidingPairs), counts(4, 0, 0)),
            BatchMode::SlidingPairs
        );
        assert_eq!(
            select_mode(Some(BatchMode::SlidingTriples), counts(2, 0, 0)),
            BatchMode::PureImages
        );
        assert_eq!(select_mode(None, counts(2, 0, 2)), BatchMode::Zip);
        assert_eq!(
            select_mode(Some(BatchMode::Zip), counts(0, 0, 3)),
            BatchMode::PromptsOnly
        );
    }
}
