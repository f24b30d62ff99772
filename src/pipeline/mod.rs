pub mod dispatcher;
pub mod session;
pub mod state;
pub mod stats;
pub mod ticker;

pub use dispatcher::Dispatcher;
pub use session::{Pipeline, RunningPipeline, SessionReport};
pub use state::{PipelineState, StateWatcher};
pub use stats::{DispatchStats, StatsSnapshot};
pub use ticker::{ExternalTicker, IntervalTicker, MonotonicClock, Tick, TickSender, TickSource};
