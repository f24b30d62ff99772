pub mod capture;
pub mod detector;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;
pub mod worker;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::utils::FoundDevice;

pub use capture::Frame;
pub use error::PipelineError;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `POSELOOP__PIPELINE__REFRESH_HZ=30`
pub const ENV_PREFIX: &str = "POSELOOP";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Initial overlay surface size
    pub width: u32,
    pub height: u32,
    /// Directory receiving overlay PNG snapshots, if any
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Tick rate when no external refresh callback drives the pipeline
    pub refresh_hz: f64,
    /// A detect call without a response after this long counts as rejected
    pub detect_timeout_ms: u64,
    /// Upper bound on waiting for the first video frame
    pub ready_timeout_ms: u64,
    pub worker_core: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub luma_threshold: u8,
    /// Minimum fraction of bright pixels for a subject to count
    pub min_coverage: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
                width: 640,
                height: 480,
                fps: 30,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
            },
            display: DisplayConfig {
                width: 640,
                height: 480,
                snapshot_dir: None,
                snapshot_every: 30,
            },
            pipeline: PipelineConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60.0,
            detect_timeout_ms: 2_000,
            ready_timeout_ms: 5_000,
            worker_core: None,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            luma_threshold: 128,
            min_coverage: 0.002,
        }
    }
}

impl Config {
    /// Layer built-in defaults, an optional TOML file, and `POSELOOP__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
