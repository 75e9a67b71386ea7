//! Relay demo binary entry point
//!
//! Captures synthetic media, fans it out over the configured links on the
//! loopback substrate and reports what every far end sees.
//!
//! # Usage
//!
//! ```bash
//! # Middlebox + end-to-end topology for 10 seconds
//! cargo run -p framerelay-relay-server
//!
//! # Topology from a file, run until Ctrl+C, JSON logs
//! cargo run -p framerelay-relay-server -- \
//!   --config ./configs/relay.yaml \
//!   --duration 0 \
//!   --json-logs
//!
//! # Prefer VP9 on every link and use a different shift
//! cargo run -p framerelay-relay-server -- \
//!   --video-codec video/VP9 \
//!   --shift 7
//! ```

use anyhow::Context;
use clap::Parser;
use framerelay_webrtc::{
    CaptureDevice, DiscardSink, LinkStats, LoopbackSubstrate, MiddleboxObserver, ObserverStats,
    RelayConfig, RenderSink, SyntheticCapture, Topology,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// FrameRelay demo
///
/// Runs relay links between in-process endpoints with an in-flight frame
/// transform, and reports per-link statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology configuration (YAML, TOML or JSON); default is middlebox + end-to-end
    #[arg(short, long, env = "FRAMERELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to run before shutting down (0 runs until Ctrl+C)
    #[arg(short, long, default_value_t = 10, env = "FRAMERELAY_DURATION")]
    duration: u64,

    /// Seconds between statistics lines
    #[arg(long, default_value_t = 2, env = "FRAMERELAY_STATS_INTERVAL")]
    stats_interval: u64,

    /// Override the transform shift
    #[arg(long, env = "FRAMERELAY_SHIFT")]
    shift: Option<u8>,

    /// Preferred video codec for every link, e.g. video/VP9
    #[arg(long, env = "FRAMERELAY_VIDEO_CODEC")]
    video_codec: Option<String>,

    /// Simulate a capture permission prompt being declined
    #[arg(long)]
    deny_capture: bool,

    /// Emit logs as JSON
    #[arg(long, env = "FRAMERELAY_LOG_JSON")]
    json_logs: bool,
}

/// Final report printed to stdout
#[derive(Debug, Serialize)]
struct Report {
    links: Vec<LinkStats>,
    sinks: HashMap<String, ObserverStats>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        eprintln!("\nCtrl+C received, shutting down...");
    })
    .context("failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("framerelay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.json_logs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        core_version = framerelay_core::version(),
        "FrameRelay demo starting"
    );

    let config = load_config(&args)?;
    info!(
        links = config.links.len(),
        shift = config.transform.shift,
        "Topology configuration loaded"
    );

    let capture = if args.deny_capture {
        SyntheticCapture::denied()
    } else {
        SyntheticCapture::new()
    };
    let source = match capture.acquire(&config.capture).await {
        Ok(source) => source,
        Err(e) => {
            error!("Cannot acquire media: {}", e);
            return Err(e.into());
        }
    };

    let observers: HashMap<String, MiddleboxObserver> = config
        .links
        .iter()
        .map(|link| (link.name.clone(), MiddleboxObserver::new(link.name.clone())))
        .collect();

    let topology = Topology::from_config(
        Arc::new(LoopbackSubstrate::new()),
        source,
        &config,
        |link| -> Arc<dyn RenderSink> {
            match observers.get(&link.name) {
                Some(observer) => Arc::new(observer.clone()),
                None => Arc::new(DiscardSink),
            }
        },
    )
    .await
    .context("failed to build topology")?;

    // links that fail are closed; the rest keep running
    if let Err(e) = topology.start_all().await {
        warn!("{}", e);
    }

    run_until_shutdown(&args, &shutdown_flag, &topology, &observers).await;

    let report = Report {
        links: topology.stats(),
        sinks: observers
            .iter()
            .map(|(name, observer)| (name.clone(), observer.stats()))
            .collect(),
    };
    topology.close_all().await;
    topology.source().stop();

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("FrameRelay demo stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(shift) = args.shift {
        config.transform.shift = shift;
    }
    if let Some(codec) = &args.video_codec {
        for link in &mut config.links {
            link.preferred_video_codec = Some(codec.clone());
        }
    }

    config.validate()?;
    Ok(config)
}

async fn run_until_shutdown(
    args: &Args,
    shutdown_flag: &AtomicBool,
    topology: &Topology,
    observers: &HashMap<String, MiddleboxObserver>,
) {
    let started = tokio::time::Instant::now();
    let run_for = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let stats_every = Duration::from_secs(args.stats_interval.max(1));
    let mut last_stats = started;

    let mut tick = tokio::time::interval(Duration::from_millis(100));
    while !shutdown_flag.load(Ordering::SeqCst) {
        tick.tick().await;

        if run_for.is_some_and(|d| started.elapsed() >= d) {
            info!("Run time elapsed");
            break;
        }

        if last_stats.elapsed() >= stats_every {
            last_stats = tokio::time::Instant::now();
            log_stats(topology, observers);
        }
    }
}

fn log_stats(topology: &Topology, observers: &HashMap<String, MiddleboxObserver>) {
    for link in topology.stats() {
        let seen = observers
            .get(&link.name)
            .map(|o| o.stats())
            .unwrap_or_default();
        info!(
            link = %link.name,
            state = %link.state,
            sent = link.sender_transform.processed,
            inverted = link.receiver_transform.processed,
            dropped = link.receiver_transform.dropped,
            received = seen.total_frames(),
            transformed = seen.transformed,
            key_frames = seen.key_frames,
            "Link statistics"
        );
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
