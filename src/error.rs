//! Error types for every layer of the pipeline

use thiserror::Error;

use crate::pipeline::state::PipelineState;

/// Errors that reach the caller of a pipeline session.
///
/// Every variant is fatal: scheduling halts and the session ends in
/// `Stopped`. Recoverable conditions (rejected or stale responses, render
/// failures) never surface here, they are logged and counted instead.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("detector initialization failed: {0}")]
    InitializationFailure(String),

    #[error("video device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("inference worker crashed")]
    WorkerCrashed,

    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

impl PipelineError {
    /// User-facing report. Startup and mid-session failures share one format.
    pub fn report(&self) -> String {
        format!("failed to start: {self}")
    }
}

/// Errors raised by the inference worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("detector is not initialized")]
    NotInitialized,

    #[error("worker channel disconnected")]
    Disconnected,

    #[error("detector initialization failed: {0}")]
    Initialization(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Errors produced by a frame source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("video device unavailable: {0}")]
    Unavailable(String),

    #[error("video source lost: {0}")]
    SourceLost(String),

    #[error("no frame available yet")]
    NotReady,
}

/// Errors produced by a detector implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("timestamp {current} ms is not after previous {previous} ms")]
    NonMonotonicTimestamp { previous: f64, current: f64 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Inference(String),
}

/// Errors decoding a raw frame buffer into RGB pixels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    #[error("buffer holds {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },
}

/// Errors produced while rendering an overlay.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("display surface has zero area ({width}x{height})")]
    EmptySurface { width: u32, height: u32 },

    #[error("{0}")]
    Other(String),
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(reason) | SourceError::SourceLost(reason) => {
                PipelineError::DeviceUnavailable(reason)
            }
            SourceError::NotReady => PipelineError::DeviceUnavailable(err.to_string()),
        }
    }
}

impl From<WorkerError> for PipelineError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Initialization(reason) => PipelineError::InitializationFailure(reason),
            WorkerError::Spawn(reason) => PipelineError::InitializationFailure(reason),
            WorkerError::Disconnected => PipelineError::WorkerCrashed,
            WorkerError::NotInitialized => PipelineError::InitializationFailure(err.to_string()),
        }
    }
}
