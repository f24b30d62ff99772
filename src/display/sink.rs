use flume::{Sender, TrySendError};

use super::surface::SurfaceSize;
use crate::detector::DetectionResult;
use crate::error::RenderError;

/// Consumer of completed detections. Called on the orchestration task, so
/// implementations must return quickly.
pub trait ResultSink: Send {
    fn render(&mut self, result: &DetectionResult, surface: SurfaceSize) -> Result<(), RenderError>;
}

/// Forwards results, with the surface size they were rendered for, to
/// another task.
pub struct ChannelSink {
    tx: Sender<(DetectionResult, SurfaceSize)>,
}

impl ChannelSink {
    pub fn new(tx: Sender<(DetectionResult, SurfaceSize)>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn render(&mut self, result: &DetectionResult, surface: SurfaceSize) -> Result<(), RenderError> {
        self.tx
            .try_send((result.clone(), surface))
            .map_err(|e| match e {
                TrySendError::Full(_) => RenderError::Other("result consumer is lagging".into()),
                TrySendError::Disconnected(_) => RenderError::Other("result consumer is gone".into()),
            })
    }
}

impl<F> ResultSink for F
where
    F: FnMut(&DetectionResult, SurfaceSize) -> Result<(), RenderError> + Send,
{
    fn render(&mut self, result: &DetectionResult, surface: SurfaceSize) -> Result<(), RenderError> {
        self(result, surface)
    }
}
