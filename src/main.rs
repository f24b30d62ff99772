//! Poseloop: single-flight pose detection over a live video feed

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use poseloop::capture::SyntheticSource;
use poseloop::detector::centroid_factory;
use poseloop::display::{OverlaySink, SurfaceHandle};
use poseloop::pipeline::{IntervalTicker, Pipeline, RunningPipeline};
use poseloop::Config;

#[derive(Debug, Parser)]
#[command(name = "poseloop", version, about = "Single-flight pose detection pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the synthetic frame source instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// Capture device path; empty means auto-detect
    #[arg(long)]
    device: Option<String>,

    /// Override the refresh tick rate
    #[arg(long)]
    refresh_hz: Option<f64>,

    /// Tracing filter directive
    #[arg(long, default_value = "poseloop=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize error handling and logging
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();

    info!("Poseloop launching...");

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.capture.device.path = device;
    }
    if let Some(hz) = cli.refresh_hz {
        config.pipeline.refresh_hz = hz;
    }
    poseloop::CONFIG.store(Arc::new(config.clone()));

    let surface = SurfaceHandle::new(config.display.width, config.display.height);
    let mut sink = OverlaySink::new();
    if let Some(dir) = config.display.snapshot_dir.clone() {
        info!("Writing overlay snapshots to {}", dir.display());
        sink = sink.with_snapshots(dir, config.display.snapshot_every);
    }
    let factory = centroid_factory(config.detector);
    let ticks = IntervalTicker::new(config.pipeline.refresh_hz);

    let started = if cli.synthetic {
        let source = SyntheticSource::new(config.capture.width, config.capture.height);
        Pipeline::new(config.pipeline.clone(), source, sink, factory, surface)
            .start(ticks)
            .await
    } else {
        start_camera(&config, sink, factory, surface, ticks).await?
    };

    let running = match started {
        Ok(running) => running,
        Err(e) => return Err(eyre!(e.report())),
    };

    run_until_stopped(running).await
}

#[cfg(feature = "v4l2")]
async fn start_camera(
    config: &Config,
    sink: OverlaySink,
    factory: poseloop::detector::DetectorFactory,
    surface: SurfaceHandle,
    ticks: IntervalTicker,
) -> Result<Result<RunningPipeline, poseloop::PipelineError>> {
    use poseloop::capture::V4l2Source;
    use poseloop::utils;

    // Auto-detect capture device if needed
    let mut capture_config = config.capture.clone();
    if capture_config.device.path.is_empty() {
        capture_config.device = utils::auto_detect_device()?;
        capture_config.format = capture_config.device.format;
    }
    info!("Using capture device: {:?}", capture_config.device);

    let source = V4l2Source::new(capture_config);
    Ok(Pipeline::new(config.pipeline.clone(), source, sink, factory, surface)
        .start(ticks)
        .await)
}

#[cfg(not(feature = "v4l2"))]
async fn start_camera(
    _config: &Config,
    _sink: OverlaySink,
    _factory: poseloop::detector::DetectorFactory,
    _surface: SurfaceHandle,
    _ticks: IntervalTicker,
) -> Result<Result<RunningPipeline, poseloop::PipelineError>> {
    Err(eyre!(
        "built without camera support; rebuild with `--features v4l2` or pass --synthetic"
    ))
}

async fn run_until_stopped(running: RunningPipeline) -> Result<()> {
    let mut state = running.state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down...");
            running.stop();
        }
        _ = state.wait_for(|s| s.is_terminal()) => {}
    }

    let report = running.wait().await.map_err(|e| eyre!(e.report()))?;
    info!(
        "Frames issued: {}, outstanding: {}, stale responses: {}, timeouts: {}",
        report.frames_issued, report.frames_outstanding, report.stats.stale, report.stats.timed_out
    );
    info!("State history: {:?}", report.history);
    Ok(())
}
