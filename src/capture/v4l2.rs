//! V4L2 camera source with a background capture thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{Frame, FrameLedger, FrameMetadata, PixelFormat};
use super::source::FrameSource;
use crate::error::SourceError;
use crate::pipeline::ticker::Tick;
use crate::CaptureConfig;

/// Most recent buffer dequeued by the capture thread.
struct Captured {
    data: Bytes,
    device_timestamp: Duration,
}

/// Camera source; the capture thread keeps only the latest buffer so that
/// `next_frame` is a snapshot and never waits on the driver.
pub struct V4l2Source {
    config: CaptureConfig,
    width: u32,
    height: u32,
    sequence: u64,
    latest: Arc<ArcSwapOption<Captured>>,
    lost: Arc<ArcSwapOption<String>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    ledger: Arc<FrameLedger>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            config,
            sequence: 0,
            latest: Arc::new(ArcSwapOption::empty()),
            lost: Arc::new(ArcSwapOption::empty()),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            ledger: FrameLedger::new(),
        }
    }

    fn configure(&mut self) -> Result<Device, SourceError> {
        let unavailable = |e: std::io::Error| SourceError::Unavailable(e.to_string());

        let device = Device::with_path(&self.config.device.path).map_err(unavailable)?;
        let caps = device.query_caps().map_err(unavailable)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SourceError::Unavailable(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = device.format().map_err(unavailable)?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = match self.config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => {
                return Err(SourceError::Unavailable(format!(
                    "unsupported capture format {other:?}"
                )))
            }
        };
        let negotiated = device.set_format(&fmt).map_err(unavailable)?;
        self.width = negotiated.width;
        self.height = negotiated.height;
        info!("Negotiated {}x{} {}", negotiated.width, negotiated.height, negotiated.fourcc);

        Ok(device)
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip(self), fields(device = %self.config.device.path))]
    fn open(&mut self) -> Result<(), SourceError> {
        let device = self.configure()?;
        let buffer_count = self.config.buffer_count;
        let latest = Arc::clone(&self.latest);
        let lost = Arc::clone(&self.lost);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count) {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!("Failed to start capture stream: {}", e);
                            lost.store(Some(Arc::new(e.to_string())));
                            return;
                        }
                    };
                info!("Capture stream started with {} buffers", buffer_count);

                while running.load(Ordering::Acquire) {
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let used = (meta.bytesused as usize).min(buf.len());
                            let used = if used == 0 { buf.len() } else { used };
                            latest.store(Some(Arc::new(Captured {
                                data: Bytes::copy_from_slice(&buf[..used]),
                                device_timestamp: Duration::from_secs(meta.timestamp.sec as u64)
                                    + Duration::from_micros(meta.timestamp.usec as u64),
                            })));
                        }
                        Err(e) => {
                            warn!("Capture stream failed: {}", e);
                            lost.store(Some(Arc::new(e.to_string())));
                            break;
                        }
                    }
                }
            })
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.latest.load().is_some()
    }

    fn next_frame(&mut self, tick: &Tick) -> Result<Frame, SourceError> {
        if let Some(reason) = self.lost.load_full() {
            return Err(SourceError::SourceLost(reason.as_ref().clone()));
        }
        let captured = self.latest.load_full().ok_or(SourceError::NotReady)?;

        self.sequence += 1;
        let bpp = self.config.format.bytes_per_pixel().unwrap_or(0) as u32;
        let meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.width * bpp,
            format: self.config.format,
            device_timestamp: Some(captured.device_timestamp),
        };
        Ok(Frame::new(
            captured.data.clone(),
            meta,
            tick.timestamp_ms,
            self.ledger.lease(),
        ))
    }

    fn ledger(&self) -> Arc<FrameLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            join_capture_thread(handle);
        }
    }
}

/// Join the capture thread without stalling an async runtime: a stalled
/// driver can keep `stream.next()` from ever returning.
fn join_capture_thread(handle: JoinHandle<()>) {
    let join = move || {
        if handle.join().is_err() {
            error!("Capture thread panicked");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}
