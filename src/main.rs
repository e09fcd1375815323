use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use wikitransp::config::{DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE, DEFAULT_THUMBNAIL_WIDTH, TARGET_MIME};
use wikitransp::discovery::{self, DiscoveryConfig};
use wikitransp::logging::{self, LoggingConfig};
use wikitransp::reverse_lines::DEFAULT_CHUNK_SIZE;
use wikitransp::{
    output, recover_resume_point, shard, BanList, EventLog, EventLogConfig, FilterConfig, FilterPipeline,
    HttpPngVerifier, Orchestrator, OrchestratorConfig, ResumeMarker, RunConfig, RunOutcome,
    WikimediaApiResolver,
};

#[derive(Parser, Debug)]
#[command(name = "wikitransp")]
#[command(about = "Filter WIT dataset shards down to PNG images with alpha transparency")]
#[command(version)]
struct Args {
    /// Shard files or glob patterns, in dataset order
    #[arg(required = true)]
    shards: Vec<String>,

    /// Output TSV (default: derived from the first shard name)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Directory for run logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Resume at (and re-check) the row with this image URL
    #[arg(long)]
    resume_at: Option<String>,

    /// Resume after the row with this image URL
    #[arg(long)]
    resume_after: Option<String>,

    /// Resume from the suggestion left in the previous run's log
    #[arg(long)]
    auto_resume: bool,

    /// Decompress .gz shards next to the originals before filtering
    #[arg(long)]
    decompress: bool,

    /// Width of thumbnails fetched for wide images
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_WIDTH)]
    thumbnail_width: u32,

    /// Minimum of width and height in pixels (0 disables)
    #[arg(long, default_value_t = DEFAULT_MIN_SIZE)]
    min_size: u32,

    /// Maximum of width and height in pixels (0 disables)
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE)]
    max_size: u32,

    /// Count fully transparent pixels as transparency, not just partial alpha
    #[arg(long)]
    count_fully_transparent: bool,

    /// Consecutive verification failures tolerated before halting
    #[arg(long, default_value_t = 10)]
    fail_limit: u32,

    /// Concurrent verification requests
    #[arg(long, default_value_t = 20)]
    max_in_flight: usize,

    /// Per-candidate verification timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Shards scanned in parallel (default: number of cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Extra banned URLs, one per line
    #[arg(long)]
    ban_list: Option<PathBuf>,

    /// Rotated log backups to keep
    #[arg(long, default_value_t = 10)]
    n_logs: usize,

    /// Console log level
    #[arg(long, default_value = "info")]
    console_level: LevelFilter,

    /// Emit console logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Suppress console progress bars
    #[arg(long)]
    no_progress: bool,

    /// Write run statistics as JSON to this path
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

fn build_verifier(args: &Args, client: reqwest::Client) -> HttpPngVerifier {
    HttpPngVerifier::new(client).with_semitransparent_only(!args.count_fully_transparent)
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // WHY: reject contradictory flags before any file is touched
    let explicit_resume = ResumeMarker::from_flags(args.resume_at.clone(), args.resume_after.clone())?;
    let orchestrator_config = OrchestratorConfig {
        workers: args.workers.unwrap_or_else(num_cpus::get),
        max_in_flight: args.max_in_flight,
        request_timeout: Duration::from_secs(args.timeout_secs),
        show_progress: !args.no_progress,
    };
    orchestrator_config.validate()?;

    let shards = discovery::collect_shards(&args.shards, DiscoveryConfig { fail_fast: true }).await?;
    let shards = if args.decompress {
        shard::decompress_gz_files(&shards, !args.no_progress)?
    } else {
        shards
    };
    let output = match &args.out {
        Some(out) => out.clone(),
        None => output::output_path_for(&shards)?,
    };
    let log_path = output::log_path_for(&output, &args.log_dir);

    // WHY: recovery reads the previous log, so it must happen before rotation
    let resume = match explicit_resume {
        Some(marker) => Some(marker),
        None if args.auto_resume => recover_resume_point(&log_path, DEFAULT_CHUNK_SIZE)?,
        None => None,
    };

    logging::init_tracing(&LoggingConfig {
        log_path: log_path.clone(),
        n_logs: args.n_logs,
        console_level: args.console_level,
        json: args.json_logs,
    })?;
    info!("Starting wikitransp v{}", env!("CARGO_PKG_VERSION"));
    info!(?args, "Parsed CLI arguments");
    if let Some(marker) = &resume {
        info!("Resuming {}", marker);
    }

    let log = Arc::new(EventLog::new(EventLogConfig {
        fail_limit: args.fail_limit,
        log_file: Some(log_path.clone()),
        ..EventLogConfig::default()
    }));

    let mut ban_list = BanList::builtin();
    if let Some(path) = &args.ban_list {
        ban_list.extend_from_file(path)?;
    }

    let client = reqwest::Client::builder()
        .timeout(orchestrator_config.request_timeout)
        .user_agent(concat!("wikitransp/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let filter_config = FilterConfig {
        target_mime: TARGET_MIME.to_string(),
        thumbnail_width: args.thumbnail_width,
        min_size: args.min_size,
        max_size: args.max_size,
    };
    let pipeline = Arc::new(FilterPipeline::new(
        filter_config,
        ban_list,
        Arc::new(build_verifier(&args, client.clone())),
        Arc::new(WikimediaApiResolver::new(client)),
        log,
    ));

    let run = RunConfig {
        shards,
        output,
        resume,
    };
    let orchestrator = Orchestrator::new(orchestrator_config);
    let report = orchestrator.run(pipeline, &run, shutdown_signal()).await?;

    if let Some(stats_out) = &args.stats_out {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(stats_out, json)
            .with_context(|| format!("Failed to write stats to {}", stats_out.display()))?;
        info!("Run statistics written to {}", stats_out.display());
    }

    println!("wikitransp v{} - {:?}", env!("CARGO_PKG_VERSION"), report.outcome);
    println!("  Candidates verified: {} of {}", report.verified, report.candidates);
    println!("  Rows written: {} to {}", report.written, report.output.display());
    println!("  Log: {}", log_path.display());
    if let Some(marker) = &report.resume {
        println!("  Resume with --resume-{} {}", marker.mode.keyword().to_lowercase(), marker.url);
    }

    Ok(match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Interrupted => ExitCode::from(1),
    })
}
