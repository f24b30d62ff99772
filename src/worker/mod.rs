//! Inference worker: an isolated context that owns the session's detector.
//!
//! The worker runs two threads. The mailbox thread receives requests and
//! tracks whether a request is being processed; anything arriving while busy
//! is rejected on the spot instead of queued. The inference thread owns the
//! detector and runs one job at a time, reporting completions back through
//! the mailbox, which clears its busy flag before forwarding the response.

pub mod protocol;

use std::thread::{self, JoinHandle};
use std::time::Instant;

use flume::{Receiver, Selector, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::detector::{Detector, DetectorFactory};
use crate::error::WorkerError;

pub use protocol::{DetectionRequest, Request, Response};

/// Worker spawn options.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Pin the inference thread to this CPU core
    pub core: Option<usize>,
}

/// Orchestration-side handle to an inference worker.
pub struct WorkerHandle {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    threads: Vec<JoinHandle<()>>,
}

enum Job {
    Init,
    Detect(DetectionRequest),
}

#[derive(Debug, Clone, Copy)]
enum Processing {
    Init,
    Detect(u64),
}

enum Event {
    Request(Option<Request>),
    Completed(Option<Response>),
}

impl WorkerHandle {
    /// Spawn the worker threads. The detector is built later, by `initialize`.
    pub fn spawn(factory: DetectorFactory, options: WorkerOptions) -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = flume::unbounded::<Request>();
        let (response_tx, response_rx) = flume::unbounded::<Response>();
        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let (done_tx, done_rx) = flume::unbounded::<Response>();

        let inference = thread::Builder::new()
            .name("pose-inference".into())
            .spawn(move || run_inference(factory, options, job_rx, done_tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        let mailbox = thread::Builder::new()
            .name("pose-mailbox".into())
            .spawn(move || run_mailbox(request_rx, done_rx, job_tx, response_tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            threads: vec![mailbox, inference],
        })
    }

    /// Wrap an externally managed worker speaking the same protocol.
    pub fn from_channels(requests: Sender<Request>, responses: Receiver<Response>) -> Self {
        Self {
            requests,
            responses,
            threads: Vec::new(),
        }
    }

    /// Wrap an external worker that speaks the JSON envelope, one message per
    /// string. Unrecognized message types are skipped, as are malformed ones.
    pub fn from_wire(requests: Sender<Request>, wire: Receiver<String>) -> Result<Self, WorkerError> {
        let (response_tx, response_rx) = flume::unbounded::<Response>();
        // Detached: it exits once the wire closes or the handle is gone
        thread::Builder::new()
            .name("pose-wire".into())
            .spawn(move || run_wire_decoder(wire, response_tx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        Ok(Self::from_channels(requests, response_rx))
    }

    /// Build the detector and wait for the worker's acknowledgement.
    ///
    /// Calling this on an already initialized worker is a no-op that is
    /// acknowledged as success; the detector is never rebuilt.
    pub async fn initialize(&self) -> Result<(), WorkerError> {
        self.requests
            .send(Request::Init)
            .map_err(|_| WorkerError::Disconnected)?;

        loop {
            let response = self
                .responses
                .recv_async()
                .await
                .map_err(|_| WorkerError::Disconnected)?;
            match response {
                Response::Init(payload) if payload.is_success => {
                    info!("Detector initialized");
                    return Ok(());
                }
                Response::Init(payload) => {
                    let reason = payload.error.unwrap_or_else(|| "unknown error".into());
                    error!("Detector initialization failed: {}", reason);
                    return Err(WorkerError::Initialization(reason));
                }
                other => debug!("Ignoring {:?} while waiting for init", other),
            }
        }
    }

    /// Hand a request to the worker without waiting for the result.
    pub fn submit(&self, request: DetectionRequest) -> Result<(), WorkerError> {
        self.requests
            .send(Request::Detect(request))
            .map_err(|_| WorkerError::Disconnected)
    }

    pub fn responses(&self) -> &Receiver<Response> {
        &self.responses
    }

    /// Close the mailbox and wait for the worker threads to finish.
    ///
    /// A request still being processed runs to completion first, so every
    /// frame the worker holds is released by the time this returns.
    pub async fn shutdown(self) {
        let WorkerHandle {
            requests,
            responses,
            threads,
        } = self;
        drop(requests);
        drop(responses);
        if threads.is_empty() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                if handle.join().is_err() {
                    error!("Worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!("Failed to join worker threads: {}", e);
        }
    }
}

fn run_mailbox(
    requests: Receiver<Request>,
    completions: Receiver<Response>,
    jobs: Sender<Job>,
    responses: Sender<Response>,
) {
    let mut processing: Option<Processing> = None;
    let mut initialized = false;

    loop {
        let event = Selector::new()
            .recv(&requests, |r| Event::Request(r.ok()))
            .recv(&completions, |r| Event::Completed(r.ok()))
            .wait();

        match event {
            Event::Request(None) => {
                debug!("Worker mailbox closed");
                break;
            }
            Event::Completed(None) => {
                error!("Inference thread exited unexpectedly");
                break;
            }
            Event::Request(Some(request)) => {
                trace!(kind = request.kind(), envelope = %request.envelope(), "Worker data received");

                if let Some(current) = processing {
                    let reply = match request {
                        Request::Init => Response::init_failed(format!("worker busy with {current:?}")),
                        Request::Detect(rejected) => {
                            warn!(
                                "Rejecting request {} while processing {:?}",
                                rejected.request_id, current
                            );
                            Response::Rejected(protocol::RejectedPayload {
                                request_id: rejected.request_id,
                            })
                        }
                    };
                    if responses.send(reply).is_err() {
                        break;
                    }
                    continue;
                }

                let job = match request {
                    Request::Init if initialized => {
                        debug!("Detector already initialized");
                        if responses.send(Response::init_ok()).is_err() {
                            break;
                        }
                        continue;
                    }
                    Request::Init => {
                        processing = Some(Processing::Init);
                        Job::Init
                    }
                    Request::Detect(request) => {
                        processing = Some(Processing::Detect(request.request_id));
                        Job::Detect(request)
                    }
                };
                if jobs.send(job).is_err() {
                    error!("Inference thread is gone");
                    break;
                }
            }
            Event::Completed(Some(response)) => {
                processing = None;
                if let Response::Init(payload) = &response {
                    initialized |= payload.is_success;
                }
                if responses.send(response).is_err() {
                    debug!("Dispatcher went away");
                    break;
                }
            }
        }
    }
}

fn run_wire_decoder(wire: Receiver<String>, responses: Sender<Response>) {
    for text in wire.iter() {
        match Response::decode(&text) {
            Ok(Some(response)) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Ok(None) => debug!("Ignoring unrecognized worker message"),
            Err(e) => warn!("Malformed worker message: {}", e),
        }
    }
    debug!("Worker wire closed");
}

fn run_inference(
    factory: DetectorFactory,
    options: WorkerOptions,
    jobs: Receiver<Job>,
    done: Sender<Response>,
) {
    if let Some(id) = options.core {
        if core_affinity::set_for_current(core_affinity::CoreId { id }) {
            info!("Inference thread pinned to core {}", id);
        } else {
            warn!("Failed to pin inference thread to core {}", id);
        }
    }

    let mut factory = Some(factory);
    let mut detector: Option<Box<dyn Detector>> = None;

    for job in jobs.iter() {
        let response = match job {
            Job::Init => match factory.take() {
                Some(build) => match build() {
                    Ok(built) => {
                        detector = Some(built);
                        Response::init_ok()
                    }
                    Err(e) => Response::init_failed(e.to_string()),
                },
                None => Response::init_failed("detector construction already attempted"),
            },
            Job::Detect(DetectionRequest { request_id, frame }) => match detector.as_mut() {
                Some(detector) => {
                    let started = Instant::now();
                    let outcome = detector.detect(&frame, frame.timestamp_ms);
                    frame.release();
                    metrics::histogram!("poseloop_inference_ms")
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    match outcome {
                        Ok(result) => Response::Detect(protocol::DetectPayload { request_id, result }),
                        Err(e) => Response::Failed(protocol::FailedPayload {
                            request_id,
                            error: e.to_string(),
                        }),
                    }
                }
                None => {
                    frame.release();
                    Response::Failed(protocol::FailedPayload {
                        request_id,
                        error: WorkerError::NotInitialized.to_string(),
                    })
                }
            },
        };
        if done.send(response).is_err() {
            break;
        }
    }
    debug!("Inference thread exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::capture::{Frame, FrameLedger, FrameMetadata, PixelFormat};
    use crate::detector::DetectionResult;
    use crate::error::DetectorError;

    struct Gated {
        gate: Receiver<()>,
    }

    impl Detector for Gated {
        fn detect(&mut self, _frame: &Frame, timestamp_ms: f64) -> Result<DetectionResult, DetectorError> {
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| DetectorError::Inference(e.to_string()))?;
            Ok(DetectionResult::empty(timestamp_ms))
        }
    }

    fn frame(ledger: &Arc<FrameLedger>, n: u64) -> Frame {
        let meta = FrameMetadata {
            sequence: n,
            width: 1,
            height: 1,
            stride: 3,
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        };
        Frame::new(Bytes::from_static(&[0, 0, 0]), meta, n as f64, ledger.lease())
    }

    fn gated_worker() -> (WorkerHandle, Sender<()>, Arc<AtomicUsize>) {
        let (gate_tx, gate_rx) = flume::unbounded();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let factory: DetectorFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Gated { gate: gate_rx }) as Box<dyn Detector>)
        });
        let worker = WorkerHandle::spawn(factory, WorkerOptions::default()).unwrap();
        (worker, gate_tx, builds)
    }

    #[tokio::test]
    async fn second_detect_is_rejected_while_busy() {
        let (worker, gate, _) = gated_worker();
        worker.initialize().await.unwrap();
        let ledger = FrameLedger::new();

        worker
            .submit(DetectionRequest {
                request_id: 1,
                frame: frame(&ledger, 1),
            })
            .unwrap();
        worker
            .submit(DetectionRequest {
                request_id: 2,
                frame: frame(&ledger, 2),
            })
            .unwrap();

        let first = worker.responses().recv_async().await.unwrap();
        assert_eq!(
            first,
            Response::Rejected(protocol::RejectedPayload { request_id: 2 })
        );

        gate.send(()).unwrap();
        let second = worker.responses().recv_async().await.unwrap();
        assert_eq!(second.request_id(), Some(1));
        assert!(matches!(second, Response::Detect(_)));

        worker.shutdown().await;
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn repeated_initialize_builds_detector_once() {
        let (worker, _gate, builds) = gated_worker();
        worker.initialize().await.unwrap();
        worker.initialize().await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn detect_before_initialize_fails_softly() {
        let (worker, _gate, _) = gated_worker();
        let ledger = FrameLedger::new();
        worker
            .submit(DetectionRequest {
                request_id: 9,
                frame: frame(&ledger, 1),
            })
            .unwrap();
        match worker.responses().recv_async().await.unwrap() {
            Response::Failed(payload) => {
                assert_eq!(payload.request_id, 9);
                assert_eq!(payload.error, WorkerError::NotInitialized.to_string());
            }
            other => panic!("unexpected {other:?}"),
        }
        worker.shutdown().await;
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn wire_messages_are_decoded_and_unknown_types_skipped() {
        let (request_tx, request_rx) = flume::unbounded();
        let (wire_tx, wire_rx) = flume::unbounded::<String>();
        let worker = WorkerHandle::from_wire(request_tx, wire_rx).unwrap();

        wire_tx
            .send(r#"{"type":"progress","payload":{"pct":50}}"#.to_string())
            .unwrap();
        wire_tx.send("not json".to_string()).unwrap();
        wire_tx.send(Response::init_ok().encode().unwrap()).unwrap();
        worker.initialize().await.unwrap();
        assert!(matches!(request_rx.recv().unwrap(), Request::Init));

        let rejected = Response::Rejected(protocol::RejectedPayload { request_id: 4 });
        wire_tx.send(rejected.encode().unwrap()).unwrap();
        assert_eq!(worker.responses().recv_async().await.unwrap(), rejected);
        assert!(worker.responses().is_empty());

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn factory_error_is_reported() {
        let factory: DetectorFactory =
            Box::new(|| Err(DetectorError::Inference("model file missing".into())));
        let worker = WorkerHandle::spawn(factory, WorkerOptions::default()).unwrap();
        let err = worker.initialize().await.unwrap_err();
        assert_eq!(err, WorkerError::Initialization("model file missing".into()));
        worker.shutdown().await;
    }
}
