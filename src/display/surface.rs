use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Displayed size of the video element the overlay is drawn over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

/// Live display surface dimensions. Clones share the same value, so the
/// window layer can resize while results are in flight.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    size: Arc<ArcSwap<SurfaceSize>>,
}

impl SurfaceHandle {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Arc::new(ArcSwap::from_pointee(SurfaceSize { width, height })),
        }
    }

    pub fn current(&self) -> SurfaceSize {
        **self.size.load()
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.size.store(Arc::new(SurfaceSize { width, height }));
    }
}
