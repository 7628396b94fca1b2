use std::collections::HashMap;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

use atrous_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use atrous_core::descriptor::plugin_manifest;
use atrous_core::graph::PipelineGraph;
use atrous_core::logging::{self, FileSink, LoggingConfig, LoggingInitOptions, DEFAULT_LOG_FILTER};
use atrous_core::node::Clip;
use atrous_core::nodes::{extract_frequency, replace_frequency, y4m_source};
use atrous_core::registry::{build_default_registry, FilterRegistry};
use atrous_core::streaming_executor::{
    FrameSink, ProgressCallback, RenderSummary, StreamingExecutor,
};
use atrous_core::types::{Frame, PortData};
use atrous_core::y4m::Y4mWriter;

#[derive(Parser)]
#[command(
    name = "atrous",
    about = "Split and recombine video frequency bands with the à trous wavelet transform"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the detail band of a Y4M clip at one scale.
    Extract(ExtractArgs),
    /// Recombine a base clip with a detail band.
    Replace(ReplaceArgs),
    /// Render a JSON workflow.
    Run(RunArgs),
    /// Print every registered filter as JSON.
    Filters,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(short = 'i', long, help = "Input Y4M file")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output Y4M file")]
    output: PathBuf,
    #[arg(short = 'r', long, help = "Scale level; defaults to filters.radius from config.toml")]
    radius: Option<i64>,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args)]
struct ReplaceArgs {
    #[arg(long, help = "Y4M clip supplying the low frequencies")]
    base: PathBuf,
    #[arg(long, help = "Y4M clip holding the detail band")]
    detail: PathBuf,
    #[arg(short = 'o', long, help = "Output Y4M file")]
    output: PathBuf,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args)]
struct RunArgs {
    #[arg(help = "Path to workflow JSON file")]
    workflow: PathBuf,
    #[arg(
        short = 'o',
        long,
        help = "Output Y4M file; frames are computed and discarded when omitted"
    )]
    output: Option<PathBuf>,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args, Clone, Copy, Default)]
struct RenderArgs {
    #[arg(short = 'j', long, help = "Frames computed concurrently (0: all cores)")]
    workers: Option<usize>,
    #[arg(long, help = "Maximum computed frames waiting to be written")]
    buffer_size: Option<usize>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        eprintln!("Warning: failed to initialize data directory: {e:#}");
    }
    let config = load_config(&resolved_data_dir);

    init_logging(
        &resolved_data_dir,
        cli.verbose,
        cli.log_filter.as_deref(),
        &config.logging,
    );
    log_startup_metadata(&resolved_data_dir);

    let registry = build_default_registry();
    match cli.command {
        Commands::Extract(args) => {
            let radius = args.radius.unwrap_or(config.filters.radius);
            let clip = build_extract(&registry, &args.input, radius)?;
            let sources = [args.input];
            let cancel = cancel_on_ctrl_c();
            render_to_file(clip, &args.output, &sources, &config, args.render, cancel).await
        }
        Commands::Replace(args) => {
            let clip = build_replace(&registry, &args.base, &args.detail)?;
            let sources = [args.base, args.detail];
            let cancel = cancel_on_ctrl_c();
            render_to_file(clip, &args.output, &sources, &config, args.render, cancel).await
        }
        Commands::Run(args) => run_workflow(&registry, &args, &config).await,
        Commands::Filters => {
            let manifest = plugin_manifest(&registry);
            let json = serde_json::to_string_pretty(&manifest)
                .context("failed to serialize filter descriptors")?;
            println!("{json}");
            Ok(())
        }
    }
}

fn load_config(data_dir: &Path) -> AppConfig {
    match AppConfig::load_from_path(&config_path(data_dir)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Warning: failed to load config file, using defaults: {err:#}");
            AppConfig::default()
        }
    }
}

fn init_logging(
    data_dir: &Path,
    verbose: u8,
    cli_log_filter: Option<&str>,
    config: &LoggingConfig,
) {
    let options = LoggingInitOptions {
        data_dir: Some(data_dir.to_path_buf()),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        config: config.clone(),
    };
    let plan = logging::plan_logging(&options);
    let filters = plan.filters;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(parse_env_filter_with_fallback(&filters.console, "console"));
    let (appender, file_status) = match plan.file {
        FileSink::Rolling { dir, appender, .. } => (Some(appender), Ok(Some(dir))),
        FileSink::Off => (None, Ok(None)),
        FileSink::Unavailable { dir, reason } => (None, Err((dir, reason))),
    };
    let file_layer = appender.map(|appender| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(appender)
            .with_filter(parse_env_filter_with_fallback(&filters.file, "file"))
    });

    let subscriber = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!(
            "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
        );
        return;
    }

    match file_status {
        Ok(log_dir) => debug!(
            filter = %filters.console,
            file_filter = %filters.file,
            source = ?filters.source,
            log_dir = ?log_dir,
            "Logging initialized"
        ),
        Err((attempted, reason)) => warn!(
            attempted_log_dir = ?attempted,
            reason = %reason,
            "Persistent file logging unavailable; continuing with console-only logging"
        ),
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn open_source(registry: &FilterRegistry, path: &Path) -> Result<Clip> {
    registry.create(
        y4m_source::NAME,
        HashMap::from([("path".to_string(), PortData::Path(path.to_path_buf()))]),
    )
}

fn build_extract(registry: &FilterRegistry, input: &Path, radius: i64) -> Result<Clip> {
    let source = open_source(registry, input)?;
    registry.create(
        extract_frequency::NAME,
        HashMap::from([
            ("clip".to_string(), PortData::Clip(source)),
            ("radius".to_string(), PortData::Int(radius)),
        ]),
    )
}

fn build_replace(registry: &FilterRegistry, base: &Path, detail: &Path) -> Result<Clip> {
    let base = open_source(registry, base)?;
    let detail = open_source(registry, detail)?;
    registry.create(
        replace_frequency::NAME,
        HashMap::from([
            ("base".to_string(), PortData::Clip(base)),
            ("detail".to_string(), PortData::Clip(detail)),
        ]),
    )
}

async fn run_workflow(registry: &FilterRegistry, args: &RunArgs, config: &AppConfig) -> Result<()> {
    info!("Loading workflow: {}", args.workflow.display());
    let graph = PipelineGraph::load(&args.workflow)?;
    let clip = graph.build(registry).context("Workflow validation failed")?;

    match &args.output {
        Some(output) => {
            let sources = graph.input_paths(registry);
            let cancel = cancel_on_ctrl_c();
            render_to_file(clip, output, &sources, config, args.render, cancel).await
        }
        None => {
            let cancel = cancel_on_ctrl_c();
            let summary = render(clip, DiscardSink, config, args.render, cancel).await?;
            report_summary(&summary);
            Ok(())
        }
    }
}

/// Render into a temporary file next to `output` and move it into place only
/// once every frame has been written. A failed or cancelled render leaves
/// whatever was at `output` untouched.
async fn render_to_file(
    clip: Clip,
    output: &Path,
    sources: &[PathBuf],
    config: &AppConfig,
    overrides: RenderArgs,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    reject_output_overwriting_source(output, sources)?;

    let dir = match output.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
            parent
        }
        None => Path::new("."),
    };
    let mut builder = tempfile::Builder::new();
    builder.prefix(".atrous-").suffix(".y4m.part");
    // Same mode File::create would give, instead of the private 0600.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    let staging = builder
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temporary output in {}", dir.display()))?;
    let file = staging
        .as_file()
        .try_clone()
        .context("failed to open temporary output")?;
    let writer = Y4mWriter::new(BufWriter::new(file), clip.video_info())?;
    debug!(
        staging = %staging.path().display(),
        output = %output.display(),
        "Writing Y4M output"
    );

    let summary = render(clip, writer, config, overrides, cancel).await?;
    report_summary(&summary);
    if summary.cancelled {
        warn!(output = %output.display(), "Output discarded");
        return Ok(());
    }

    staging
        .persist(output)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move output into {}", output.display()))?;
    info!(output = %output.display(), "Output written");
    Ok(())
}

fn reject_output_overwriting_source(output: &Path, sources: &[PathBuf]) -> Result<()> {
    // An output that does not exist yet cannot be one of the inputs.
    let Ok(resolved) = output.canonicalize() else {
        return Ok(());
    };
    for source in sources {
        if source.canonicalize().is_ok_and(|path| path == resolved) {
            bail!(
                "output {} is also an input ({}); choose another output path",
                output.display(),
                source.display()
            );
        }
    }
    Ok(())
}

async fn render<S: FrameSink>(
    clip: Clip,
    sink: S,
    config: &AppConfig,
    overrides: RenderArgs,
    cancel: watch::Receiver<bool>,
) -> Result<RenderSummary> {
    let executor = executor_for(config, overrides);
    info!(
        clip = %clip.video_info().describe(),
        frames = clip.video_info().num_frames,
        workers = executor.workers(),
        buffer_size = executor.buffer_size(),
        "Rendering"
    );
    let result = executor
        .render(clip, sink, cancel, Some(make_progress_callback()))
        .await;
    eprintln!();
    result.context("Render failed")
}

fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping render");
            let _ = cancel_tx.send(true);
        }
    });
    cancel_rx
}

fn executor_for(config: &AppConfig, overrides: RenderArgs) -> StreamingExecutor {
    let mut render = config.render.clone();
    if let Some(workers) = overrides.workers {
        render.workers = workers;
    }
    if let Some(buffer_size) = overrides.buffer_size {
        render.buffer_size = buffer_size;
    }
    StreamingExecutor::new(render.effective_workers(), render.buffer_size)
}

fn report_summary(summary: &RenderSummary) {
    if summary.cancelled {
        warn!(
            frames = summary.frames_written,
            total_frames = summary.total_frames,
            "Render cancelled"
        );
    } else {
        info!(
            frames = summary.frames_written,
            elapsed = %format_duration(summary.elapsed.as_secs_f64()),
            fps = format!("{:.2}", summary.fps()),
            "Render completed"
        );
    }
}

/// Sink for `run` without an output file.
struct DiscardSink;

impl FrameSink for DiscardSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

const PROGRESS_BAR_WIDTH: usize = 30;

fn progress_line(written: u64, total: u64, elapsed: f64) -> String {
    let fraction = if total > 0 {
        (written as f64 / total as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let empty = PROGRESS_BAR_WIDTH.saturating_sub(filled);
    let bar: String = "█".repeat(filled) + &"░".repeat(empty);

    let fps = compute_fps(written, elapsed);
    let eta = if fps > 0.0 {
        let remaining = total.saturating_sub(written) as f64;
        format!(" | ETA: {}", format_duration(remaining / fps))
    } else {
        String::new()
    };

    format!(
        "[{}] {:5.1}% | Frame {}/{} | {:.1} fps | Elapsed: {}{}",
        bar,
        fraction * 100.0,
        written,
        total,
        fps,
        format_duration(elapsed),
        eta,
    )
}

fn compute_fps(written: u64, elapsed: f64) -> f64 {
    if elapsed <= 0.0 {
        return 0.0;
    }
    written as f64 / elapsed
}

fn make_progress_callback() -> ProgressCallback {
    let start = Instant::now();
    Box::new(move |written, total| {
        eprint!(
            "\r{}    ",
            progress_line(written, total, start.elapsed().as_secs_f64())
        );
    })
}



#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_extract_with_radius() {
        let cli = Cli::try_parse_from([
            "atrous", "-v", "extract", "-i", "in.y4m", "-o", "out.y4m", "-r", "3", "-j", "2",
        ])
        .expect("extract args parse");
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Extract(args) => {
                assert_eq!(args.input, PathBuf::from("in.y4m"));
                assert_eq!(args.radius, Some(3));
                assert_eq!(args.render.workers, Some(2));
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "atrous",
            "filters",
            "--log-filter",
            "atrous_core=trace",
            "--data-dir",
            "/tmp/atrous",
        ])
        .expect("filters args parse");
        assert_eq!(cli.log_filter.as_deref(), Some("atrous_core=trace"));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/atrous")));
        assert!(matches!(cli.command, Commands::Filters));
    }

    #[test]
    fn overrides_take_precedence_over_config() {
        let mut config = AppConfig::default();
        config.render.workers = 6;
        config.render.buffer_size = 12;

        let executor = executor_for(&config, RenderArgs::default());
        assert_eq!(executor.workers(), 6);
        assert_eq!(executor.buffer_size(), 12);

        let executor = executor_for(
            &config,
            RenderArgs {
                workers: Some(2),
                buffer_size: Some(3),
            },
        );
        assert_eq!(executor.workers(), 2);
        assert_eq!(executor.buffer_size(), 3);
    }
}
