mod common;

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::*;
use poseloop::capture::{FrameSource, SyntheticSource};
use poseloop::detector::DetectionResult;
use poseloop::display::{ResultSink, SurfaceHandle, SurfaceSize};
use poseloop::error::RenderError;
use poseloop::pipeline::dispatcher::DispatchExit;
use poseloop::pipeline::{DispatchStats, Dispatcher, ExternalTicker, PipelineState, StateWatcher, TickSender};
use poseloop::worker::protocol::{DetectPayload, FailedPayload, RejectedPayload};
use poseloop::worker::{DetectionRequest, Request, Response, WorkerHandle};
use poseloop::PipelineError;

/// The other end of a [`WorkerHandle`] built from plain channels.
struct FakeWorker {
    requests: Receiver<Request>,
    responses: Sender<Response>,
}

impl FakeWorker {
    async fn next_detect(&self) -> DetectionRequest {
        let request = tokio::time::timeout(WAIT, self.requests.recv_async())
            .await
            .expect("timed out waiting for a request")
            .expect("dispatcher hung up");
        match request {
            Request::Detect(request) => request,
            Request::Init => panic!("unexpected init request"),
        }
    }

    fn reply(&self, response: Response) {
        self.responses.send(response).unwrap();
    }

    fn complete(&self, request_id: u64, timestamp_ms: f64) {
        self.reply(Response::Detect(DetectPayload {
            request_id,
            result: DetectionResult::empty(timestamp_ms),
        }));
    }
}

struct Harness {
    ticks: TickSender,
    stop: watch::Sender<bool>,
    state: StateWatcher,
    stats: Arc<DispatchStats>,
    worker: FakeWorker,
    task: JoinHandle<DispatchExit>,
}

fn launch<K: ResultSink + 'static>(sink: K, detect_timeout: Duration) -> Harness {
    let (request_tx, request_rx) = flume::unbounded();
    let (response_tx, response_rx) = flume::unbounded();
    let handle = WorkerHandle::from_channels(request_tx, response_rx);

    let mut source = SyntheticSource::new(8, 8);
    source.open().unwrap();

    let state = ready_state();
    let watcher = state.watcher();
    let stats = Arc::new(DispatchStats::default());
    let (ticks, ticker) = ExternalTicker::channel();
    let (stop, stop_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        state,
        source,
        sink,
        handle,
        SurfaceHandle::new(320, 240),
        Arc::clone(&stats),
        detect_timeout,
    );
    let task = tokio::spawn(dispatcher.run(ticker, stop_rx));

    Harness {
        ticks,
        stop,
        state: watcher,
        stats,
        worker: FakeWorker {
            requests: request_rx,
            responses: response_tx,
        },
        task,
    }
}

const NO_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::test]
async fn stale_and_duplicate_responses_are_discarded() {
    let (sink, results) = collecting_sink();
    let h = launch(sink, NO_TIMEOUT);

    h.ticks.tick(10.0);
    let first = h.worker.next_detect().await;
    assert_eq!(first.request_id, 1);
    h.worker.complete(1, 10.0);
    assert_eq!(next_result(&results).await.timestamp_ms, 10.0);

    // Duplicate of an answered request
    h.worker.complete(1, 10.0);
    assert!(wait_until(|| h.stats.stale() == 1).await);
    assert_eq!(h.state.get(), PipelineState::Ready);

    h.ticks.tick(20.0);
    let second = h.worker.next_detect().await;
    assert_eq!(second.request_id, 2);

    // A mismatched id neither completes nor cancels the real request
    h.worker.complete(1, 10.0);
    assert!(wait_until(|| h.stats.stale() == 2).await);
    assert_eq!(h.state.get(), PipelineState::Busy);

    h.worker.complete(2, 20.0);
    assert_eq!(next_result(&results).await.timestamp_ms, 20.0);
    assert!(results.is_empty());

    h.stop.send_replace(true);
    let exit = h.task.await.unwrap();
    assert!(exit.result.is_ok());
    assert_eq!(h.stats.completed(), 2);
}

#[tokio::test]
async fn timed_out_request_frees_the_slot() {
    let (sink, results) = collecting_sink();
    let h = launch(sink, Duration::from_millis(50));

    h.ticks.tick(0.0);
    let slow = h.worker.next_detect().await;
    assert!(wait_until(|| h.stats.timed_out() == 1).await);
    assert_eq!(h.state.get(), PipelineState::Ready);

    h.ticks.tick(16.0);
    let next = h.worker.next_detect().await;
    assert_eq!(next.request_id, 2);

    // The slow answer arrives after its deadline
    h.worker.complete(slow.request_id, slow.frame.timestamp_ms);
    h.worker.complete(next.request_id, next.frame.timestamp_ms);
    assert_eq!(next_result(&results).await.timestamp_ms, 16.0);
    assert_eq!(h.stats.stale(), 1);
    assert!(results.is_empty());

    h.stop.send_replace(true);
    h.task.await.unwrap().result.unwrap();
}

#[tokio::test]
async fn rejected_and_failed_requests_return_to_ready() {
    let (sink, results) = collecting_sink();
    let h = launch(sink, NO_TIMEOUT);

    h.ticks.tick(0.0);
    let first = h.worker.next_detect().await;
    h.worker.reply(Response::Rejected(RejectedPayload {
        request_id: first.request_id,
    }));
    assert!(wait_until(|| h.stats.rejected() == 1).await);
    assert_eq!(h.state.get(), PipelineState::Ready);

    h.ticks.tick(16.0);
    let second = h.worker.next_detect().await;
    h.worker.reply(Response::Failed(FailedPayload {
        request_id: second.request_id,
        error: "inference exploded".into(),
    }));
    assert!(wait_until(|| h.stats.failed() == 1).await);
    assert_eq!(h.state.get(), PipelineState::Ready);
    assert!(results.is_empty());

    h.ticks.tick(32.0);
    let third = h.worker.next_detect().await;
    h.worker.complete(third.request_id, 32.0);
    assert_eq!(next_result(&results).await.timestamp_ms, 32.0);

    h.stop.send_replace(true);
    h.task.await.unwrap().result.unwrap();
}

#[tokio::test]
async fn render_failures_are_counted_not_fatal() {
    let sink = |_: &DetectionResult, _: SurfaceSize| -> Result<(), RenderError> {
        Err(RenderError::Other("canvas lost".into()))
    };
    let h = launch(sink, NO_TIMEOUT);

    for (i, ts) in [0.0, 16.0].into_iter().enumerate() {
        h.ticks.tick(ts);
        let request = h.worker.next_detect().await;
        h.worker.complete(request.request_id, ts);
        assert!(wait_until(|| h.stats.render_failures() == i as u64 + 1).await);
    }
    assert_eq!(h.state.get(), PipelineState::Ready);

    h.stop.send_replace(true);
    h.task.await.unwrap().result.unwrap();
}

#[tokio::test]
async fn worker_disappearing_is_a_crash() {
    let (sink, _results) = collecting_sink();
    let h = launch(sink, NO_TIMEOUT);

    h.ticks.tick(0.0);
    let _in_flight = h.worker.next_detect().await;
    drop(h.worker);

    let exit = h.task.await.unwrap();
    assert!(matches!(exit.result, Err(PipelineError::WorkerCrashed)));
    assert_eq!(h.state.get(), PipelineState::Stopped);
    assert_eq!(
        h.state.history(),
        vec![
            PipelineState::Idle,
            PipelineState::Initializing,
            PipelineState::Ready,
            PipelineState::Busy,
            PipelineState::Stopped
        ]
    );
}

#[tokio::test]
async fn stop_discards_late_response() {
    let (sink, results) = collecting_sink();
    let h = launch(sink, NO_TIMEOUT);

    h.ticks.tick(0.0);
    let request = h.worker.next_detect().await;
    h.stop.send_replace(true);
    let exit = h.task.await.unwrap();
    assert!(exit.result.is_ok());
    assert_eq!(h.state.get(), PipelineState::Stopped);

    // The worker answers after the dispatcher is gone
    let _ = h.worker.responses.send(Response::Detect(DetectPayload {
        request_id: request.request_id,
        result: DetectionResult::empty(0.0),
    }));
    assert!(results.try_recv().is_err());
    assert_eq!(h.stats.completed(), 0);
}
