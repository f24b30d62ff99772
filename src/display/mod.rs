pub mod overlay;
pub mod sink;
pub mod surface;

pub use overlay::OverlaySink;
pub use sink::{ChannelSink, ResultSink};
pub use surface::{SurfaceHandle, SurfaceSize};
