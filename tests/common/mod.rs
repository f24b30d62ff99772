#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::time::{sleep, Instant};

use poseloop::capture::{Frame, FrameLedger};
use poseloop::detector::{DetectionResult, Detector, DetectorFactory};
use poseloop::display::{ChannelSink, SurfaceSize};
use poseloop::error::DetectorError;
use poseloop::pipeline::state::{PipelineState, StateCell};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(1)).await;
    }
    cond()
}

pub fn collecting_sink() -> (ChannelSink, Receiver<(DetectionResult, SurfaceSize)>) {
    let (tx, rx) = flume::unbounded();
    (ChannelSink::new(tx), rx)
}

pub async fn next_result(rx: &Receiver<(DetectionResult, SurfaceSize)>) -> DetectionResult {
    tokio::time::timeout(WAIT, rx.recv_async())
        .await
        .expect("timed out waiting for a result")
        .expect("sink channel closed")
        .0
}

/// A state cell already brought up to `Ready`.
pub fn ready_state() -> StateCell {
    let state = StateCell::new();
    state.transition(PipelineState::Initializing).unwrap();
    state.transition(PipelineState::Ready).unwrap();
    state
}

/// Observations shared between a [`RecordingDetector`] and the test.
#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: AtomicU64,
    /// Highest number of live frames seen while inside `detect`
    pub max_outstanding: AtomicU64,
    pub timestamps: Mutex<Vec<f64>>,
}

/// Detector returning empty results, optionally blocking on a gate, and
/// recording what it sees.
pub struct RecordingDetector {
    recorder: Arc<Recorder>,
    ledger: Option<Arc<FrameLedger>>,
    gate: Option<Receiver<()>>,
}

impl Detector for RecordingDetector {
    fn detect(&mut self, _frame: &Frame, timestamp_ms: f64) -> Result<DetectionResult, DetectorError> {
        self.recorder.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ledger) = &self.ledger {
            self.recorder
                .max_outstanding
                .fetch_max(ledger.outstanding(), Ordering::SeqCst);
        }
        self.recorder.timestamps.lock().unwrap().push(timestamp_ms);
        if let Some(gate) = &self.gate {
            gate.recv_timeout(WAIT)
                .map_err(|e| DetectorError::Inference(e.to_string()))?;
        }
        Ok(DetectionResult::empty(timestamp_ms))
    }
}

pub fn recording_factory(ledger: Option<Arc<FrameLedger>>) -> (DetectorFactory, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let shared = Arc::clone(&recorder);
    let factory: DetectorFactory = Box::new(move || {
        Ok(Box::new(RecordingDetector {
            recorder: shared,
            ledger,
            gate: None,
        }) as Box<dyn Detector>)
    });
    (factory, recorder)
}

/// Factory for a detector that holds every request until the returned
/// sender releases it.
pub fn gated_factory() -> (DetectorFactory, Sender<()>, Arc<Recorder>) {
    let (gate_tx, gate_rx) = flume::unbounded();
    let recorder = Arc::new(Recorder::default());
    let shared = Arc::clone(&recorder);
    let factory: DetectorFactory = Box::new(move || {
        Ok(Box::new(RecordingDetector {
            recorder: shared,
            ledger: None,
            gate: Some(gate_rx),
        }) as Box<dyn Detector>)
    });
    (factory, gate_tx, recorder)
}
