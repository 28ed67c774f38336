//! Command-line selection → batch request

use anyhow::{Context, Result};
use clap::Args;
use jobs::BatchRequest;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use workflow::{
    fixed_prefix_images, ApiConfig, BatchMode, FieldKind, InterfaceTemplate, ScannedAssets,
};

/// Which files and values go into a batch
#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    /// Working directory holding images, videos and prompt files
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Batch mode (m0..m13, m7a, m7b); recommended from the selection when omitted
    #[arg(long)]
    pub mode: Option<BatchMode>,

    /// Image to include (default: every image in the directory)
    #[arg(long = "image", value_name = "NAME")]
    pub images: Vec<String>,

    /// Video to include (default: every video in the directory)
    #[arg(long = "video", value_name = "NAME")]
    pub videos: Vec<String>,

    /// Prompt file to include (default: every .json/.txt in the directory)
    #[arg(long = "prompt-file", value_name = "NAME")]
    pub prompt_files: Vec<String>,

    /// Extra prompt, appended after the file prompts
    #[arg(long = "prompt", value_name = "TEXT")]
    pub prompts: Vec<String>,

    /// Leave images out of the batch
    #[arg(long)]
    pub no_images: bool,

    /// Leave videos out of the batch
    #[arg(long)]
    pub no_videos: bool,

    /// Leave prompt files and --prompt values out of the batch
    #[arg(long)]
    pub no_prompts: bool,

    /// Override a field value
    #[arg(long = "set", value_name = "CODE[:FIELD]=VALUE")]
    pub assignments: Vec<String>,

    /// Local file(s) for the image slot, comma-separated
    #[arg(long, value_name = "A[,B]")]
    pub fixed_image: Option<String>,

    /// Local file for the video slot
    #[arg(long, value_name = "V")]
    pub fixed_video: Option<String>,

    /// Pin #/##/### prefixed images: fixed image slot for m10/m11, image field 1/2/3 for m13
    #[arg(long)]
    pub fixed_from_prefix: bool,
}

fn pick(explicit: &[String], scanned: &[String], disabled: bool) -> Vec<String> {
    if disabled {
        Vec::new()
    } else if explicit.is_empty() {
        scanned.to_vec()
    } else {
        explicit.to_vec()
    }
}

/// Turn the selection flags into a request against a scanned directory
pub fn build_request(
    args: &SelectionArgs,
    config: ApiConfig,
    scanned: &ScannedAssets,
) -> Result<BatchRequest> {
    let template =
        InterfaceTemplate::from_config(&config).context("Invalid interface template")?;
    let mut request = BatchRequest::new(config, template, &scanned.dir);

    for assignment in &args.assignments {
        let key = request
            .editor
            .apply_assignment(&request.template, assignment)?;
        debug!("Field {} set from the command line", key);
    }

    request.images = pick(&args.images, &scanned.images, args.no_images);
    request.videos = pick(&args.videos, &scanned.videos, args.no_videos);
    request.prompt_files = pick(&args.prompt_files, &scanned.prompt_files, args.no_prompts);
    if !args.no_prompts {
        request.extra_prompts = args.prompts.clone();
    }
    request.mode = args.mode;
    // an edited image/video slot names local files, same as --fixed-*
    let slot_edit = |kind| {
        request
            .template
            .slot(kind)
            .and_then(|field| request.editor.get(&field.key()))
            .map(str::to_string)
    };
    let fixed_image = args.fixed_image.clone().or_else(|| slot_edit(FieldKind::Image));
    let fixed_video = args.fixed_video.clone().or_else(|| slot_edit(FieldKind::Video));
    request.fixed_image = fixed_image;
    request.fixed_video = fixed_video;

    if args.fixed_from_prefix {
        let pinned = fixed_prefix_images(&request.images);
        if let Some(conflict) = &pinned.conflict {
            warn!("Prefix pinning disabled: {}", conflict);
        } else if let Some(prefix) = pinned.prefix_value() {
            if request.fixed_image.is_none() {
                info!("Fixed image slot from name prefixes: {}", prefix);
                request.fixed_image = Some(prefix);
            } else {
                warn!("Fixed image slot already set, pinned {} only left out of the list", prefix);
            }
            request.pinned_images = pinned
                .pinned
                .iter()
                .map(|(position, name)| (usize::from(*position), name.clone()))
                .collect();
            request.images = pinned.sequential;
        }
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use workflow::parse_config;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        selection: SelectionArgs,
    }

    const CONFIG: &str = r#"{
        "url": "https://www.runninghub.cn/task/openapi/ai-app/run",
        "webappId": 1937,
        "apiKey": "abcd1234efgh",
        "nodeInfoList": [
            {"nodeId": "39", "fieldName": "image", "fieldValue": "x.png", "description": "image"},
            {"nodeId": "52", "fieldName": "prompt", "fieldValue": "", "description": "prompt"},
            {"nodeId": "3", "fieldName": "seed", "fieldValue": "1", "description": "seed"}
        ]
    }"#;

    fn parse(args: &[&str]) -> SelectionArgs {
        let mut argv = vec!["test"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).selection
    }

    fn scanned(images: &[&str]) -> ScannedAssets {
        ScannedAssets {
            dir: PathBuf::from("/work"),
            images: images.iter().map(|s| s.to_string()).collect(),
            videos: vec!["clip.mp4".to_string()],
            prompt_files: vec!["prompts.txt".to_string()],
        }
    }

    #[test]
    fn test_defaults_take_all_scanned_files() {
        let args = parse(&["--no-videos", "--prompt", "extra"]);
        let request = build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&["a.png"]))
            .unwrap();
        assert_eq!(request.images, vec!["a.png"]);
        assert!(request.videos.is_empty());
        assert_eq!(request.prompt_files, vec!["prompts.txt"]);
        assert_eq!(request.extra_prompts, vec!["extra"]);
        assert_eq!(request.mode, None);
    }

    #[test]
    fn test_explicit_lists_and_mode() {
        let args = parse(&["--image", "b.png", "--mode", "m7a", "--no-prompts", "--prompt", "x"]);
        let request =
            build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&["a.png", "b.png"]))
                .unwrap();
        assert_eq!(request.images, vec!["b.png"]);
        assert_eq!(request.mode, Some(BatchMode::SlidingPairs));
        assert!(request.prompt_files.is_empty());
        assert!(request.extra_prompts.is_empty());
    }

    #[test]
    fn test_assignments_reach_the_editor() {
        let args = parse(&["--set", "3=42"]);
        let request = build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&[])).unwrap();
        let seed = request.template.fields()[2].clone();
        assert_eq!(request.editor.value_for(&seed), "42");

        let bad = parse(&["--set", "99=1"]);
        assert!(build_request(&bad, parse_config(CONFIG).unwrap(), &scanned(&[])).is_err());
    }

    #[test]
    fn test_image_slot_edit_becomes_fixed_image() {
        let args = parse(&["--set", "39=a.png,b.png"]);
        let request = build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&[])).unwrap();
        assert_eq!(request.fixed_image.as_deref(), Some("a.png,b.png"));

        let args = parse(&["--set", "39=a.png", "--fixed-image", "c.png"]);
        let request = build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&[])).unwrap();
        assert_eq!(request.fixed_image.as_deref(), Some("c.png"));
    }

    #[test]
    fn test_fixed_from_prefix() {
        let args = parse(&["--fixed-from-prefix"]);
        let request = build_request(
            &args,
            parse_config(CONFIG).unwrap(),
            &scanned(&["##face.png", "#body.png", "a.png", "b.png"]),
        )
        .unwrap();
        assert_eq!(request.fixed_image.as_deref(), Some("#body.png,##face.png"));
        assert_eq!(request.images, vec!["a.png", "b.png"]);
        assert_eq!(request.pinned_images.get(&1).map(String::as_str), Some("#body.png"));
        assert_eq!(request.pinned_images.get(&2).map(String::as_str), Some("##face.png"));
    }

    #[test]
    fn test_prefix_conflict_keeps_list() {
        let args = parse(&["--fixed-from-prefix"]);
        let images = ["#one.png", "#two.png", "a.png"];
        let request =
            build_request(&args, parse_config(CONFIG).unwrap(), &scanned(&images)).unwrap();
        assert_eq!(request.fixed_image, None);
        assert!(request.pinned_images.is_empty());
        assert_eq!(request.images.len(), 3);
    }
}
