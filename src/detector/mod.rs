//! Detector capability and the result types it produces.
//!
//! The pipeline treats the detector as a black box: it is constructed once
//! inside the inference worker and fed frames in timestamp order.

pub mod centroid;
pub mod landmarks;

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::DetectorError;
use crate::DetectorConfig;

pub use centroid::CentroidPoseDetector;
pub use landmarks::{POSE_CONNECTIONS, POSE_LANDMARK_COUNT};

/// One landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Depth relative to the hips; smaller is closer to the camera
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

/// Landmarks of a single detected subject.
pub type PoseLandmarks = Vec<Landmark>;

/// Output of one detect call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Timestamp of the frame this result was computed from
    pub timestamp_ms: f64,
    pub landmarks: Vec<PoseLandmarks>,
}

impl DetectionResult {
    pub fn empty(timestamp_ms: f64) -> Self {
        Self {
            timestamp_ms,
            landmarks: Vec::new(),
        }
    }

    pub fn subjects(&self) -> usize {
        self.landmarks.len()
    }
}

/// Stateful per-frame inference.
pub trait Detector: Send {
    /// Run inference on `frame` using `timestamp_ms` as the video clock.
    fn detect(&mut self, frame: &Frame, timestamp_ms: f64) -> Result<DetectionResult, DetectorError>;
}

/// Builds the session's detector inside the worker.
pub type DetectorFactory =
    Box<dyn FnOnce() -> Result<Box<dyn Detector>, DetectorError> + Send + 'static>;

/// Factory for the built-in reference detector.
pub fn centroid_factory(config: DetectorConfig) -> DetectorFactory {
    Box::new(move || Ok(Box::new(CentroidPoseDetector::new(config)) as Box<dyn Detector>))
}

/// Rejects video timestamps that do not strictly increase.
#[derive(Debug, Default)]
pub struct VideoClock {
    last_ms: Option<f64>,
}

impl VideoClock {
    pub fn advance(&mut self, timestamp_ms: f64) -> Result<(), DetectorError> {
        if let Some(previous) = self.last_ms {
            if timestamp_ms <= previous {
                return Err(DetectorError::NonMonotonicTimestamp {
                    previous,
                    current: timestamp_ms,
                });
            }
        }
        self.last_ms = Some(timestamp_ms);
        Ok(())
    }
}
