//! Reference detector: fits the standing pose template to the brightest
//! region of the frame.

use tracing::trace;

use super::landmarks::{POSE_LANDMARK_COUNT, STANDING_TEMPLATE};
use super::{DetectionResult, Detector, Landmark, VideoClock};
use crate::capture::{decoder, Frame};
use crate::error::DetectorError;
use crate::DetectorConfig;

pub struct CentroidPoseDetector {
    config: DetectorConfig,
    clock: VideoClock,
}

/// Bright-region statistics in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Blob {
    cx: f32,
    cy: f32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    count: u64,
}

impl CentroidPoseDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            clock: VideoClock::default(),
        }
    }

    fn find_blob(&self, image: &image::RgbImage) -> Option<Blob> {
        let mut sum_x = 0u64;
        let mut sum_y = 0u64;
        let mut count = 0u64;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for (x, y, px) in image.enumerate_pixels() {
            let [r, g, b] = px.0;
            let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            if luma >= self.config.luma_threshold as u32 {
                sum_x += x as u64;
                sum_y += y as u64;
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        let total = image.width() as u64 * image.height() as u64;
        if count == 0 || (count as f32) < self.config.min_coverage * total as f32 {
            return None;
        }
        Some(Blob {
            cx: sum_x as f32 / count as f32 + 0.5,
            cy: sum_y as f32 / count as f32 + 0.5,
            min_x,
            min_y,
            max_x,
            max_y,
            count,
        })
    }
}

impl Detector for CentroidPoseDetector {
    fn detect(&mut self, frame: &Frame, timestamp_ms: f64) -> Result<DetectionResult, DetectorError> {
        self.clock.advance(timestamp_ms)?;
        let image = decoder::decode_frame(frame)?;
        let (width, height) = (image.width() as f32, image.height() as f32);

        let Some(blob) = self.find_blob(&image) else {
            trace!("No subject in frame {}", frame.meta.sequence);
            return Ok(DetectionResult::empty(timestamp_ms));
        };

        let span_x = (blob.max_x - blob.min_x + 1) as f32 / width;
        let span_y = (blob.max_y - blob.min_y + 1) as f32 / height;
        let area = (blob.max_x - blob.min_x + 1) as f32 * (blob.max_y - blob.min_y + 1) as f32;
        let fill = (blob.count as f32 / area).clamp(0.0, 1.0);

        let mut pose = Vec::with_capacity(POSE_LANDMARK_COUNT);
        for &(tx, ty, tz) in STANDING_TEMPLATE.iter() {
            pose.push(Landmark {
                x: blob.cx / width + tx * span_x,
                y: blob.cy / height + ty * span_y,
                z: tz,
                visibility: fill,
                presence: 1.0,
            });
        }

        Ok(DetectionResult {
            timestamp_ms,
            landmarks: vec![pose],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, SyntheticSource};
    use crate::pipeline::ticker::Tick;

    fn tick(sequence: u64, timestamp_ms: f64) -> Tick {
        Tick {
            sequence,
            timestamp_ms,
        }
    }

    #[test]
    fn finds_synthetic_subject() {
        let mut source = SyntheticSource::new(96, 72);
        source.open().unwrap();
        let frame = source.next_frame(&tick(1, 250.0)).unwrap();
        let (cx, _) = source.subject_center(250.0);

        let mut detector = CentroidPoseDetector::new(DetectorConfig::default());
        let result = detector.detect(&frame, frame.timestamp_ms).unwrap();
        assert_eq!(result.timestamp_ms, 250.0);
        assert_eq!(result.subjects(), 1);

        let pose = &result.landmarks[0];
        assert_eq!(pose.len(), POSE_LANDMARK_COUNT);
        // Hip midpoint sits close to the blob centre
        let hip_x = (pose[23].x + pose[24].x) / 2.0;
        assert!((hip_x - cx / 96.0).abs() < 0.05, "{hip_x} vs {}", cx / 96.0);
        assert!(pose[0].y < pose[27].y, "nose above ankles");
    }

    #[test]
    fn dark_frame_has_no_subjects() {
        let mut detector = CentroidPoseDetector::new(DetectorConfig {
            luma_threshold: 250,
            ..DetectorConfig::default()
        });
        let mut source = SyntheticSource::new(32, 32);
        source.open().unwrap();
        let frame = source.next_frame(&tick(1, 1.0)).unwrap();
        let result = detector.detect(&frame, 1.0).unwrap();
        assert_eq!(result.subjects(), 0);
    }

    #[test]
    fn repeated_timestamp_is_refused() {
        let mut source = SyntheticSource::new(16, 16);
        source.open().unwrap();
        let mut detector = CentroidPoseDetector::new(DetectorConfig::default());
        let a = source.next_frame(&tick(1, 40.0)).unwrap();
        let b = source.next_frame(&tick(2, 40.0)).unwrap();
        detector.detect(&a, 40.0).unwrap();
        assert!(matches!(
            detector.detect(&b, 40.0),
            Err(DetectorError::NonMonotonicTimestamp { .. })
        ));
    }
}
