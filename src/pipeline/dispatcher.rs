//! Single-flight dispatcher.
//!
//! Each refresh tick either captures a frame and submits it to the worker, or
//! is dropped because a request is already in flight. Frames are never queued:
//! the only frame the worker ever holds is the one belonging to the tracked
//! in-flight request, and results reach the sink in request order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep_until;
use tracing::{debug, error, instrument, trace, warn};

use super::state::{PipelineState, StateCell};
use super::stats::DispatchStats;
use super::ticker::{Tick, TickSource};
use crate::capture::FrameSource;
use crate::display::{ResultSink, SurfaceHandle};
use crate::error::{PipelineError, SourceError};
use crate::worker::protocol::{DetectPayload, FailedPayload};
use crate::worker::{DetectionRequest, Response, WorkerHandle};

/// Far enough in the future to never fire.
const IDLE_DEADLINE: Duration = Duration::from_secs(86_400);

#[derive(Debug)]
struct InFlight {
    request_id: u64,
    frame_timestamp_ms: f64,
    issued_at: Instant,
    deadline: tokio::time::Instant,
}

pub struct Dispatcher<S, K> {
    state: StateCell,
    source: S,
    sink: K,
    worker: WorkerHandle,
    surface: SurfaceHandle,
    stats: Arc<DispatchStats>,
    detect_timeout: Duration,
    next_request_id: u64,
    in_flight: Option<InFlight>,
}

/// What the dispatcher hands back when it stops.
pub struct DispatchExit {
    pub worker: WorkerHandle,
    pub result: Result<(), PipelineError>,
}

impl<S, K> Dispatcher<S, K>
where
    S: FrameSource,
    K: ResultSink,
{
    /// `state` must already be `Ready`.
    pub fn new(
        state: StateCell,
        source: S,
        sink: K,
        worker: WorkerHandle,
        surface: SurfaceHandle,
        stats: Arc<DispatchStats>,
        detect_timeout: Duration,
    ) -> Self {
        Self {
            state,
            source,
            sink,
            worker,
            surface,
            stats,
            detect_timeout,
            next_request_id: 1,
            in_flight: None,
        }
    }

    /// Drive the loop until stopped, the tick source ends, or a fatal error.
    pub async fn run<T: TickSource>(mut self, mut ticks: T, mut stop: watch::Receiver<bool>) -> DispatchExit {
        let result = self.run_loop(&mut ticks, &mut stop).await;
        if let Err(e) = &result {
            error!("{}", e.report());
        }
        self.halt();
        DispatchExit {
            worker: self.worker,
            result,
        }
    }

    async fn run_loop<T: TickSource>(
        &mut self,
        ticks: &mut T,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let responses = self.worker.responses().clone();

        loop {
            if *stop.borrow_and_update() {
                debug!("Stop requested");
                return Ok(());
            }

            let deadline = self
                .in_flight
                .as_ref()
                .map(|f| f.deadline)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_DEADLINE);

            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() {
                        debug!("Pipeline controller dropped");
                        return Ok(());
                    }
                }
                response = responses.recv_async() => match response {
                    Ok(response) => self.on_response(response)?,
                    Err(_) => return Err(PipelineError::WorkerCrashed),
                },
                _ = sleep_until(deadline), if self.in_flight.is_some() => self.on_timeout()?,
                tick = ticks.next_tick() => match tick {
                    Some(tick) => self.on_tick(tick)?,
                    None => {
                        debug!("Tick source ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    #[instrument(level = "trace", skip(self), fields(seq = tick.sequence))]
    fn on_tick(&mut self, tick: Tick) -> Result<(), PipelineError> {
        self.stats.record_tick();

        if self.state.get() != PipelineState::Ready {
            trace!("Dropping tick at {:.3} ms, worker busy", tick.timestamp_ms);
            self.stats.record_dropped_tick();
            return Ok(());
        }

        let frame = match self.source.next_frame(&tick) {
            Ok(frame) => frame,
            Err(SourceError::NotReady) => {
                self.stats.record_source_miss();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.state.transition(PipelineState::Busy)?;
        self.in_flight = Some(InFlight {
            request_id,
            frame_timestamp_ms: frame.timestamp_ms,
            issued_at: Instant::now(),
            deadline: tokio::time::Instant::now() + self.detect_timeout,
        });
        self.stats.record_dispatch();
        trace!("Dispatching request {} for frame {}", request_id, frame.meta.sequence);

        self.worker
            .submit(DetectionRequest { request_id, frame })
            .map_err(|_| PipelineError::WorkerCrashed)
    }

    fn on_response(&mut self, response: Response) -> Result<(), PipelineError> {
        let Some(request_id) = response.request_id() else {
            debug!("Ignoring unexpected {:?}", response);
            return Ok(());
        };

        let flight = match self.in_flight.take() {
            Some(flight) if flight.request_id == request_id => flight,
            other => {
                self.in_flight = other;
                warn!("Discarding stale response for request {}", request_id);
                self.stats.record_stale();
                return Ok(());
            }
        };
        self.state.transition(PipelineState::Ready)?;

        match response {
            Response::Detect(DetectPayload { result, .. }) => {
                self.stats.record_completion();
                metrics::histogram!("poseloop_detect_latency_ms")
                    .record(flight.issued_at.elapsed().as_secs_f64() * 1000.0);
                if result.timestamp_ms != flight.frame_timestamp_ms {
                    debug!(
                        "Result {} stamped {} ms, frame was {} ms",
                        request_id, result.timestamp_ms, flight.frame_timestamp_ms
                    );
                }

                if let Err(e) = self.sink.render(&result, self.surface.current()) {
                    warn!("Failed to render result {}: {}", request_id, e);
                    self.stats.record_render_failure();
                }
            }
            Response::Rejected(_) => {
                warn!("Worker rejected request {}", request_id);
                self.stats.record_rejection();
            }
            Response::Failed(FailedPayload { error, .. }) => {
                warn!("Error detecting pose: {}", error);
                self.stats.record_failure();
            }
            Response::Init(_) => {}
        }
        Ok(())
    }

    fn on_timeout(&mut self) -> Result<(), PipelineError> {
        if let Some(flight) = self.in_flight.take() {
            warn!(
                "Request {} timed out after {:?}",
                flight.request_id,
                flight.issued_at.elapsed()
            );
            self.stats.record_timeout();
            self.state.transition(PipelineState::Ready)?;
        }
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            debug!("Discarding in-flight request {}", flight.request_id);
        }
        if let Err(e) = self.state.stop() {
            error!("Failed to stop pipeline: {}", e);
        }
    }
}
