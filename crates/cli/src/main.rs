use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hub_client::{RunConfig, RunningHubBackend, TaskBackend};
use jobs::{prepare_batch, BatchEvent, BatchRuntime, UploadCache};
use workflow::{
    fixed_prefix_images, load_config_file, scan_directory, ApiConfig, ConfigHistory,
    InterfaceTemplate, RequestPayload,
};

mod metadata;
mod selection;

use selection::{build_request, SelectionArgs};

#[derive(Parser)]
#[command(name = "hub-batch")]
#[command(about = "Batch runner for RunningHub AI applications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log file, appended to
    #[arg(long, global = true, default_value = "api_runner_log.txt")]
    log_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a configuration and its interface template
    Inspect {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the images, videos and prompt files of a directory
    Scan {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Print the request payloads a run would submit
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Skip uploads and use local file names
        #[arg(long)]
        dry_run: bool,

        /// Run settings file (JSON)
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Submit the batch and wait for every task
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        settings: RunArgs,
    },

    /// List remembered configurations
    History,

    /// Export embedded metadata of .safetensors files
    Metadata {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
struct ConfigArgs {
    /// Configuration file (JSON or curl text)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of a remembered configuration
    #[arg(long)]
    config_name: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Run settings file (JSON); flags below override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Retries after a failed attempt, per task [default: 6]
    #[arg(long)]
    max_retries: Option<u32>,

    /// Wait between attempts of one task [default: 60]
    #[arg(long, value_name = "SECS")]
    retry_interval: Option<f64>,

    /// Wait between output polls [default: 5]
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<f64>,

    /// Give up on an attempt after this long [default: 300]
    #[arg(long, value_name = "SECS")]
    task_timeout: Option<f64>,

    /// Pause after a successful task [default: 0]
    #[arg(long, value_name = "SECS")]
    success_delay: Option<f64>,

    /// Timeout of a single HTTP request [default: 60]
    #[arg(long, value_name = "SECS")]
    request_timeout: Option<f64>,

    /// Download result files into this directory
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Write per-task results here [default: results.json]
    #[arg(long)]
    results_file: Option<PathBuf>,

    /// Directory for failure reports [default: .]
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl RunArgs {
    fn resolve(&self) -> Result<RunConfig> {
        let mut config = load_settings(self.settings.as_deref())?;
        if let Some(n) = self.max_retries {
            config = config.with_max_retries(n);
        }
        if let Some(secs) = self.retry_interval {
            config = config.with_retry_interval(secs);
        }
        if let Some(secs) = self.poll_interval {
            config = config.with_polling_interval(secs);
        }
        if let Some(secs) = self.task_timeout {
            config = config.with_task_timeout(secs);
        }
        if let Some(secs) = self.success_delay {
            config = config.with_success_delay(secs);
        }
        if let Some(secs) = self.request_timeout {
            config = config.with_request_timeout(secs);
        }
        if let Some(dir) = &self.download_dir {
            config = config.with_download_dir(Some(dir.clone()));
        }
        if let Some(file) = &self.results_file {
            config = config.with_results_file(Some(file.clone()));
        }
        if let Some(dir) = &self.report_dir {
            config = config.with_report_dir(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, &cli.log_file);

    match cli.command {
        Commands::Inspect { config } => inspect_command(config).await,
        Commands::Scan { dir } => scan_command(dir).await,
        Commands::Plan {
            config,
            selection,
            dry_run,
            settings,
        } => plan_command(config, selection, dry_run, settings).await,
        Commands::Run {
            config,
            selection,
            settings,
        } => run_command(config, selection, settings).await,
        Commands::History => history_command().await,
        Commands::Metadata { dir } => metadata_command(dir).await,
    }
}

fn init_logging(verbose: bool, log_file: &Path) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=info,reqwest=info", level)));

    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_file.display(), e);
            None
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}

fn load_settings(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load(path),
        None => Ok(RunConfig::default()),
    }
}

fn open_history() -> Option<ConfigHistory> {
    let file = ConfigHistory::default_path()?;
    match ConfigHistory::load(&file) {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("Configuration history unavailable: {:#}", e);
            None
        }
    }
}

/// Load the configuration named on the command line and remember it
fn load_config(args: &ConfigArgs) -> Result<ApiConfig> {
    let mut history = open_history();

    let path = match (&args.config, &args.config_name) {
        (Some(path), _) => path.clone(),
        (None, Some(name)) => history
            .as_ref()
            .and_then(|h| h.lookup(name))
            .map(|entry| entry.path.clone())
            .with_context(|| format!("No remembered configuration named '{}'", name))?,
        (None, None) => bail!("Pass --config or --config-name"),
    };

    let config = load_config_file(&path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    info!(
        "Loaded {} (webappId {}, key {})",
        path.display(),
        config.webapp_id,
        config.masked_key()
    );

    if let Some(history) = history.as_mut() {
        history.record(&path);
        if let Err(e) = history.save() {
            warn!("Failed to save configuration history: {:#}", e);
        }
    }

    Ok(config)
}

async fn inspect_command(args: ConfigArgs) -> Result<()> {
    let config = load_config(&args)?;
    let template = InterfaceTemplate::from_config(&config)?;

    println!("URL:       {}", config.url);
    println!("webappId:  {}", config.webapp_id);
    println!("API key:   {}", config.masked_key());
    if let Some(name) = config.source_name() {
        println!("Source:    {}", name);
    }
    println!();
    println!("Interface ({} fields):", template.len());
    for field in template.fields() {
        println!(
            "  {:<8} {:<12} {:<7} {:<24} {}",
            field.code, field.field_name, field.kind, field.name, field.default_value
        );
    }

    Ok(())
}

async fn scan_command(dir: PathBuf) -> Result<()> {
    let assets = scan_directory(&dir)?;

    println!("Directory: {} ({} files)", dir.display(), assets.total());
    for (label, list) in [
        ("Images", &assets.images),
        ("Videos", &assets.videos),
        ("Prompt files", &assets.prompt_files),
    ] {
        println!("{} ({}):", label, list.len());
        for name in list.iter() {
            println!("  {}", name);
        }
    }

    let pinned = fixed_prefix_images(&assets.images);
    if let Some(conflict) = &pinned.conflict {
        warn!("Pinned images ignored: {}", conflict);
    } else if !pinned.pinned.is_empty() {
        println!("Pinned images:");
        for (position, name) in &pinned.pinned {
            println!("  {} -> {}", position, name);
        }
    }

    Ok(())
}

async fn plan_command(
    config_args: ConfigArgs,
    selection: SelectionArgs,
    dry_run: bool,
    settings: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(&config_args)?;
    let assets = scan_directory(&selection.dir)?;
    let request = build_request(&selection, config, &assets)?;

    let mut cache = UploadCache::new();
    let prepared = if dry_run {
        prepare_batch(&request, None, &mut cache).await?
    } else {
        let settings = load_settings(settings.as_deref())?;
        let backend = RunningHubBackend::new(&request.config, &settings)?;
        prepare_batch(&request, Some(&backend as &dyn TaskBackend), &mut cache).await?
    };

    info!(
        "{}: {} images, {} videos, {} prompts -> {} requests",
        prepared.mode,
        prepared.counts.images,
        prepared.counts.videos,
        prepared.counts.prompts,
        prepared.payloads.len()
    );
    if prepared.fell_back {
        warn!("Selection produced no items, the single default request is used");
    }
    if !prepared.dropped_uploads.is_empty() {
        warn!("Left out after failed uploads: {}", prepared.dropped_uploads.join(", "));
    }

    let redacted: Vec<RequestPayload> =
        prepared.payloads.iter().map(RequestPayload::redacted).collect();
    println!("{}", serde_json::to_string_pretty(&redacted)?);

    Ok(())
}

async fn run_command(
    config_args: ConfigArgs,
    selection: SelectionArgs,
    run_args: RunArgs,
) -> Result<()> {
    let settings = run_args.resolve()?;
    let config = load_config(&config_args)?;
    let assets = scan_directory(&selection.dir)?;
    let request = build_request(&selection, config, &assets)?;

    let backend: Arc<dyn TaskBackend> = Arc::new(RunningHubBackend::new(&request.config, &settings)?);
    let runtime = BatchRuntime::new();
    let handle = runtime.start(request, backend, settings)?;
    info!("Run {} started", handle.run_id);

    let result = tokio::task::spawn_blocking(move || {
        loop {
            match handle.rx_events.recv_timeout(Duration::from_millis(500)) {
                Ok(event) => {
                    println!("[{}] {}", Local::now().format("%H:%M:%S"), event);
                    if matches!(event, BatchEvent::Finished(_) | BatchEvent::Aborted(_)) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) if !handle.is_finished() => {}
                Err(_) => break,
            }
        }
        handle.join()
    })
    .await
    .context("Batch monitor failed")?;

    let summary = result?;
    println!();
    println!("Mode:             {}", summary.mode);
    println!("Tasks:            {}", summary.total);
    println!("Succeeded:        {}", summary.succeeded);
    println!("Failed:           {}", summary.failed);
    if summary.downloads_failed > 0 {
        println!("Failed downloads: {}", summary.downloads_failed);
    }
    if summary.dropped_uploads > 0 {
        println!("Dropped uploads:  {}", summary.dropped_uploads);
    }
    if let Some(path) = &summary.results_file {
        println!("Results:          {}", path.display());
    }

    Ok(())
}

async fn history_command() -> Result<()> {
    let history = open_history().context("No configuration history available")?;

    if history.entries().is_empty() {
        println!("No remembered configurations");
        return Ok(());
    }
    for entry in history.entries() {
        println!(
            "{}  {:<32} {}",
            entry.last_used.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.name,
            entry.path.display()
        );
    }

    Ok(())
}

async fn metadata_command(dir: PathBuf) -> Result<()> {
    let export = metadata::export_dir(&dir)?;

    for path in &export.written {
        println!("Wrote {}", path.display());
    }
    for (name, reason) in &export.skipped {
        println!("Skipped {}: {}", name, reason);
    }
    println!(
        "{} written, {} skipped",
        export.written.len(),
        export.skipped.len()
    );

    Ok(())
}
