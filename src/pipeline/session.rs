//! Session lifecycle: bring-up, the running dispatcher, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, instrument, warn};

use super::dispatcher::{DispatchExit, Dispatcher};
use super::state::{PipelineState, StateCell, StateWatcher};
use super::stats::{DispatchStats, StatsSnapshot};
use super::ticker::TickSource;
use crate::capture::{FrameLedger, FrameSource};
use crate::detector::DetectorFactory;
use crate::display::{ResultSink, SurfaceHandle};
use crate::error::PipelineError;
use crate::worker::{WorkerHandle, WorkerOptions};
use crate::PipelineConfig;

const READY_POLL: Duration = Duration::from_millis(10);

/// A pipeline that has not been started yet. Owns its state, so several
/// pipelines can coexist in one process.
pub struct Pipeline<S, K> {
    config: PipelineConfig,
    source: S,
    sink: K,
    factory: DetectorFactory,
    surface: SurfaceHandle,
    state: StateCell,
}

/// A started pipeline. Dropping it without calling [`RunningPipeline::wait`]
/// stops the dispatcher at its next scheduling point.
pub struct RunningPipeline {
    stop: watch::Sender<bool>,
    task: JoinHandle<DispatchExit>,
    state: StateWatcher,
    stats: Arc<DispatchStats>,
    ledger: Arc<FrameLedger>,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub stats: StatsSnapshot,
    pub history: Vec<PipelineState>,
    pub frames_issued: u64,
    pub frames_outstanding: u64,
}

impl<S, K> Pipeline<S, K>
where
    S: FrameSource + 'static,
    K: ResultSink + 'static,
{
    pub fn new(
        config: PipelineConfig,
        source: S,
        sink: K,
        factory: DetectorFactory,
        surface: SurfaceHandle,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            factory,
            surface,
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> StateWatcher {
        self.state.watcher()
    }

    /// Acquire the device, initialize the detector, wait for video, and start
    /// dispatching ticks from `ticks`.
    ///
    /// A failure leaves the pipeline `Stopped`; restarting needs a new
    /// `Pipeline`.
    #[instrument(skip_all)]
    pub async fn start<T>(self, ticks: T) -> Result<RunningPipeline, PipelineError>
    where
        T: TickSource + 'static,
    {
        let Pipeline {
            config,
            mut source,
            sink,
            factory,
            surface,
            state,
        } = self;

        state.transition(PipelineState::Initializing)?;

        if let Err(e) = source.open() {
            return Err(fail(&state, e.into()));
        }

        let options = WorkerOptions {
            core: config.worker_core,
        };
        let worker = match WorkerHandle::spawn(factory, options) {
            Ok(worker) => worker,
            Err(e) => return Err(fail(&state, e.into())),
        };
        if let Err(e) = worker.initialize().await {
            worker.shutdown().await;
            return Err(fail(&state, e.into()));
        }

        wait_for_video(&source, Duration::from_millis(config.ready_timeout_ms)).await;
        state.transition(PipelineState::Ready)?;
        info!("Pipeline ready");

        let watcher = state.watcher();
        let stats = Arc::new(DispatchStats::default());
        let ledger = source.ledger();
        let (stop, stop_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            state,
            source,
            sink,
            worker,
            surface,
            Arc::clone(&stats),
            Duration::from_millis(config.detect_timeout_ms),
        );
        let task = tokio::spawn(dispatcher.run(ticks, stop_rx));

        Ok(RunningPipeline {
            stop,
            task,
            state: watcher,
            stats,
            ledger,
        })
    }
}

impl RunningPipeline {
    /// Request a stop without waiting for it. An in-flight detection is left
    /// to finish in the worker and its result is discarded.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> StateWatcher {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the dispatcher to finish, then shut the worker down.
    pub async fn wait(self) -> Result<SessionReport, PipelineError> {
        let exit = match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Dispatcher task failed: {}", e);
                return Err(PipelineError::WorkerCrashed);
            }
        };
        exit.worker.shutdown().await;
        exit.result?;

        let report = SessionReport {
            stats: self.stats.snapshot(),
            history: self.state.history(),
            frames_issued: self.ledger.issued(),
            frames_outstanding: self.ledger.outstanding(),
        };
        info!(
            "Session finished: {} ticks, {} dispatched, {} dropped, {} completed",
            report.stats.ticks, report.stats.dispatched, report.stats.dropped_ticks, report.stats.completed
        );
        Ok(report)
    }
}

fn fail(state: &StateCell, err: PipelineError) -> PipelineError {
    error!("{}", err.report());
    if let Err(e) = state.stop() {
        error!("Failed to stop pipeline: {}", e);
    }
    err
}

/// Wait until the source has pixels, but never longer than `timeout`; some
/// devices never report readiness and still deliver frames.
async fn wait_for_video<S: FrameSource>(source: &S, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !source.is_ready() {
        if Instant::now() >= deadline {
            warn!("Video not ready after {:?}, starting anyway", timeout);
            return;
        }
        sleep(READY_POLL).await;
    }
}
