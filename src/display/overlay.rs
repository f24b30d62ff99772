//! Pose overlay rendering into an RGBA canvas matching the live surface.

use std::path::PathBuf;

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use tracing::{debug, instrument, warn};

use super::sink::ResultSink;
use super::surface::SurfaceSize;
use crate::detector::{DetectionResult, POSE_CONNECTIONS};
use crate::error::RenderError;

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const CONNECTOR_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Linear map of `value` from `[min, max]` onto `[start, end]`, clamped.
pub fn lerp(value: f32, min: f32, max: f32, start: f32, end: f32) -> f32 {
    let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
    start + (end - start) * t
}

/// Landmark dot radius: closer points (smaller z) are drawn larger.
pub fn landmark_radius(z: f32) -> f32 {
    lerp(z, -0.15, 0.1, 5.0, 1.0)
}

pub struct OverlaySink {
    canvas: RgbaImage,
    renders: u64,
    snapshots: Option<(PathBuf, u64)>,
}

impl OverlaySink {
    pub fn new() -> Self {
        Self {
            canvas: RgbaImage::new(0, 0),
            renders: 0,
            snapshots: None,
        }
    }

    /// Write the canvas as PNG into `dir` every `every` renders.
    pub fn with_snapshots(mut self, dir: PathBuf, every: u64) -> Self {
        self.snapshots = Some((dir, every.max(1)));
        self
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    fn draw(&mut self, result: &DetectionResult, surface: SurfaceSize) {
        let (w, h) = (surface.width as f32, surface.height as f32);

        for pose in &result.landmarks {
            for &(a, b) in POSE_CONNECTIONS.iter() {
                if let (Some(from), Some(to)) = (pose.get(a), pose.get(b)) {
                    draw_line_segment_mut(
                        &mut self.canvas,
                        (from.x * w, from.y * h),
                        (to.x * w, to.y * h),
                        CONNECTOR_COLOR,
                    );
                }
            }
            for landmark in pose {
                let radius = landmark_radius(landmark.z).round() as i32;
                draw_filled_circle_mut(
                    &mut self.canvas,
                    ((landmark.x * w).round() as i32, (landmark.y * h).round() as i32),
                    radius,
                    LANDMARK_COLOR,
                );
            }
        }
    }

    fn snapshot(&self) {
        let Some((dir, every)) = &self.snapshots else {
            return;
        };
        if self.renders % every != 0 {
            return;
        }
        let path = dir.join(format!("overlay-{:06}.png", self.renders));
        let canvas = self.canvas.clone();
        // PNG encoding stays off the orchestration task
        tokio::task::spawn_blocking(move || {
            if let Err(e) = canvas.save(&path) {
                warn!("Failed to write overlay snapshot {}: {}", path.display(), e);
            }
        });
    }
}

impl Default for OverlaySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for OverlaySink {
    #[instrument(skip_all, fields(subjects = result.subjects()))]
    fn render(&mut self, result: &DetectionResult, surface: SurfaceSize) -> Result<(), RenderError> {
        if surface.width == 0 || surface.height == 0 {
            return Err(RenderError::EmptySurface {
                width: surface.width,
                height: surface.height,
            });
        }

        // Size follows the live surface on every render
        if self.canvas.dimensions() != (surface.width, surface.height) {
            debug!("Resizing overlay to {}x{}", surface.width, surface.height);
            self.canvas = RgbaImage::from_pixel(surface.width, surface.height, CLEAR);
        } else {
            self.canvas.pixels_mut().for_each(|p| *p = CLEAR);
        }

        self.draw(result, surface);
        self.renders += 1;
        self.snapshot();
        Ok(())
    }
}
