use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};

/// A captured frame on its way through the pipeline.
///
/// Frames are move-only. The dispatcher moves a frame into exactly one
/// detection request and the worker drops it once inference finishes, which
/// releases its lease in the issuing source's [`FrameLedger`].
pub struct Frame {
    /// Raw pixel buffer, shared with the capture thread without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Monotonic capture timestamp in milliseconds, taken from the refresh tick
    pub timestamp_ms: f64,

    _lease: FrameLease,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata, timestamp_ms: f64, lease: FrameLease) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp_ms,
            _lease: lease,
        }
    }

    /// Explicitly close the frame, releasing its lease.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Counts frames handed out by a source and frames released again.
///
/// Every frame holds a lease; dropping the frame releases it exactly once.
#[derive(Debug, Default)]
pub struct FrameLedger {
    issued: CachePadded<AtomicU64>,
    released: CachePadded<AtomicU64>,
}

impl FrameLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a lease for a new frame.
    pub fn lease(self: &Arc<Self>) -> FrameLease {
        self.issued.fetch_add(1, Ordering::Relaxed);
        FrameLease {
            ledger: Arc::clone(self),
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Frames currently alive somewhere in the pipeline.
    pub fn outstanding(&self) -> u64 {
        self.issued().saturating_sub(self.released())
    }
}

/// Release token carried by every [`Frame`].
pub struct FrameLease {
    ledger: Arc<FrameLedger>,
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::AcqRel);
    }
}
