//! Synthetic frame source rendering a bright moving subject on a dark
//! background. Useful without a camera and in tests.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::frame::{Frame, FrameLedger, FrameMetadata, PixelFormat};
use super::source::FrameSource;
use crate::error::SourceError;
use crate::pipeline::ticker::Tick;

const BACKGROUND: u8 = 16;
const SUBJECT: u8 = 240;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    sequence: u64,
    opened: bool,
    fail_open: Option<String>,
    lose_after: Option<u64>,
    ledger: Arc<FrameLedger>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            sequence: 0,
            opened: false,
            fail_open: None,
            lose_after: None,
            ledger: FrameLedger::new(),
        }
    }

    /// Make `open` fail as if permission to the device was denied.
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.fail_open = Some(reason.into());
        self
    }

    /// Report the device as lost once `frames` frames have been produced.
    pub fn lose_after(mut self, frames: u64) -> Self {
        self.lose_after = Some(frames);
        self
    }

    /// Subject centre in pixels at a given time.
    pub fn subject_center(&self, timestamp_ms: f64) -> (f32, f32) {
        let t = timestamp_ms / 1000.0;
        let w = self.width as f64;
        let h = self.height as f64;
        let x = w / 2.0 + (w / 4.0) * (t * 0.7).sin();
        let y = h / 2.0 + (h / 6.0) * (t * 1.1).cos();
        (x as f32, y as f32)
    }

    fn render(&self, timestamp_ms: f64) -> Vec<u8> {
        let (cx, cy) = self.subject_center(timestamp_ms);
        let radius = (self.width.min(self.height) as f32 / 6.0).max(1.0);
        let r2 = radius * radius;

        let mut data = vec![BACKGROUND; (self.width * self.height * 3) as usize];
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    let i = ((y * self.width + x) * 3) as usize;
                    data[i..i + 3].fill(SUBJECT);
                }
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if let Some(reason) = &self.fail_open {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        info!("Synthetic source opened ({}x{})", self.width, self.height);
        self.opened = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.opened
    }

    fn next_frame(&mut self, tick: &Tick) -> Result<Frame, SourceError> {
        if !self.opened {
            return Err(SourceError::NotReady);
        }
        if let Some(limit) = self.lose_after {
            if self.sequence >= limit {
                debug!("Synthetic source lost after {} frames", self.sequence);
                return Err(SourceError::SourceLost("synthetic stream ended".into()));
            }
        }

        self.sequence += 1;
        let meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.width * 3,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        };
        let data = Bytes::from(self.render(tick.timestamp_ms));
        Ok(Frame::new(data, meta, tick.timestamp_ms, self.ledger.lease()))
    }

    fn ledger(&self) -> Arc<FrameLedger> {
        Arc::clone(&self.ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(sequence: u64, timestamp_ms: f64) -> Tick {
        Tick {
            sequence,
            timestamp_ms,
        }
    }

    #[test]
    fn frames_carry_tick_timestamp() {
        let mut source = SyntheticSource::new(32, 24);
        assert_eq!(source.next_frame(&tick(1, 5.0)).unwrap_err(), SourceError::NotReady);

        source.open().unwrap();
        let frame = source.next_frame(&tick(1, 16.7)).unwrap();
        assert_eq!(frame.timestamp_ms, 16.7);
        assert_eq!(frame.meta.sequence, 1);
        assert_eq!(frame.data.len(), 32 * 24 * 3);
    }

    #[test]
    fn subject_pixels_are_bright() {
        let mut source = SyntheticSource::new(60, 60);
        source.open().unwrap();
        let frame = source.next_frame(&tick(1, 0.0)).unwrap();
        let (cx, cy) = source.subject_center(0.0);
        let i = ((cy as u32 * 60 + cx as u32) * 3) as usize;
        assert_eq!(frame.data[i], SUBJECT);
        assert_eq!(frame.data[0], BACKGROUND);
    }

    #[test]
    fn open_failure_and_loss() {
        let mut denied = SyntheticSource::new(8, 8).failing_open("permission denied");
        assert!(matches!(denied.open(), Err(SourceError::Unavailable(_))));

        let mut source = SyntheticSource::new(8, 8).lose_after(1);
        source.open().unwrap();
        assert!(source.next_frame(&tick(1, 1.0)).is_ok());
        assert!(matches!(
            source.next_frame(&tick(2, 2.0)),
            Err(SourceError::SourceLost(_))
        ));
        assert_eq!(source.ledger().outstanding(), 0);
    }
}
