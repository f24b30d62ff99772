use std::sync::Arc;

use super::frame::{Frame, FrameLedger};
use crate::error::SourceError;
use crate::pipeline::ticker::Tick;

/// Producer of timestamped frames, polled once per refresh tick.
///
/// Implementations must never block in [`FrameSource::next_frame`]: a source
/// backed by a device keeps the latest buffer around and snapshots it.
pub trait FrameSource: Send {
    /// Acquire the underlying device.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Whether pixel data is available yet.
    fn is_ready(&self) -> bool;

    /// Capture one frame stamped with the tick's timestamp.
    ///
    /// `SourceError::NotReady` is transient; any other error means the device
    /// is gone for the rest of the session.
    fn next_frame(&mut self, tick: &Tick) -> Result<Frame, SourceError>;

    /// Ledger tracking the frames this source has handed out.
    fn ledger(&self) -> Arc<FrameLedger>;
}
