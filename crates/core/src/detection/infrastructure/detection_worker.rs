use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::capture::domain::session::SessionId;
use crate::detection::domain::detection_dispatch::{
    DetectionDispatch, DetectionEvent, DetectionResponse,
};
use crate::detection::domain::detection_engine::{DetectionEngine, EngineError, EngineOptions};
use crate::shared::frame::Frame;

struct DetectionRequest {
    session: SessionId,
    frame: Frame,
}

/// Runs a [`DetectionEngine`] on a dedicated thread.
///
/// Requests are tagged with the submitting session and answered on the event
/// channel returned by [`DetectionWorker::spawn`]. The engine is built on the
/// worker thread, so a slow model load never blocks the caller.
pub struct DetectionWorker {
    submitter: DetectionSubmitter,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cloneable submission handle implementing [`DetectionDispatch`].
#[derive(Clone)]
pub struct DetectionSubmitter {
    request_tx: Sender<DetectionRequest>,
    in_flight: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
}

impl DetectionWorker {
    pub fn spawn<F>(factory: F, options: EngineOptions) -> (Self, Receiver<DetectionEvent>)
    where
        F: FnOnce() -> Result<Box<dyn DetectionEngine>, EngineError> + Send + 'static,
    {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<DetectionRequest>(1);
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<DetectionEvent>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker_in_flight = in_flight.clone();
        let thread = thread::Builder::new()
            .name("face-detection".into())
            .spawn(move || {
                let engine = factory().and_then(|mut engine| {
                    engine.configure(&options)?;
                    Ok(engine)
                });
                match engine {
                    Ok(engine) => {
                        log::info!(
                            "Detection engine ready (model: {}, min confidence: {:.2})",
                            options.model,
                            options.min_confidence
                        );
                        serve(engine, request_rx, shutdown_rx, event_tx, worker_in_flight);
                    }
                    Err(e) => {
                        // Close the request side first so no submission can
                        // be parked on a worker that will never answer.
                        drop(request_rx);
                        log::warn!("{e}");
                        let _ = event_tx.send(DetectionEvent::EngineUnavailable(e.to_string()));
                    }
                }
            })
            .ok();

        if thread.is_none() {
            log::error!("Failed to spawn detection thread");
        }

        let worker = Self {
            submitter: DetectionSubmitter {
                request_tx,
                in_flight,
                dropped: Arc::new(AtomicUsize::new(0)),
            },
            shutdown_tx: Some(shutdown_tx),
            thread,
        };
        (worker, event_rx)
    }

    pub fn submitter(&self) -> DetectionSubmitter {
        self.submitter.clone()
    }

    /// Stops the worker thread and waits for the current request to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Detection thread panicked");
            }
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DetectionSubmitter {
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Frames discarded because a request was still outstanding.
    pub fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn try_submit(&self, session: SessionId, frame: Frame) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self
            .request_tx
            .try_send(DetectionRequest { session, frame })
            .is_err()
        {
            // Worker gone (engine unavailable or shut down).
            self.in_flight.store(false, Ordering::Release);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

impl DetectionDispatch for DetectionSubmitter {
    fn submit(&self, session: SessionId, frame: Frame) -> bool {
        self.try_submit(session, frame)
    }
}

fn serve(
    mut engine: Box<dyn DetectionEngine>,
    request_rx: Receiver<DetectionRequest>,
    shutdown_rx: Receiver<()>,
    event_tx: Sender<DetectionEvent>,
    in_flight: Arc<AtomicBool>,
) {
    loop {
        let request = crossbeam_channel::select! {
            recv(request_rx) -> msg => match msg {
                Ok(request) => request,
                Err(_) => return,
            },
            recv(shutdown_rx) -> _ => return,
        };

        let t0 = Instant::now();
        let event = match engine.detect(&request.frame) {
            Ok(result) => DetectionEvent::Response(DetectionResponse {
                session: request.session,
                result,
                frame: Arc::new(request.frame),
                latency: t0.elapsed(),
            }),
            Err(e) => DetectionEvent::Failed {
                session: request.session,
                error: e.to_string(),
            },
        };

        let delivered = event_tx.send(event).is_ok();
        in_flight.store(false, Ordering::Release);
        if !delivered {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detection_engine::ModelKind;
    use crate::detection::domain::detection_result::DetectionResult;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Engine that blocks until the test releases it, so in-flight behavior
    /// is deterministic.
    struct GatedEngine {
        release_rx: Receiver<DetectionResult>,
        configured: Arc<Mutex<Option<EngineOptions>>>,
    }

    impl DetectionEngine for GatedEngine {
        fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
            *self.configured.lock().unwrap() = Some(*options);
            Ok(())
        }

        fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult, Box<dyn std::error::Error>> {
            self.release_rx
                .recv()
                .map_err(|e| -> Box<dyn std::error::Error> { e.to_string().into() })
        }
    }

    struct FailingEngine;

    impl DetectionEngine for FailingEngine {
        fn configure(&mut self, _options: &EngineOptions) -> Result<(), EngineError> {
            Ok(())
        }

        fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult, Box<dyn std::error::Error>> {
            Err("inference failed".into())
        }
    }

    struct PanickingEngine;

    impl DetectionEngine for PanickingEngine {
        fn configure(&mut self, _options: &EngineOptions) -> Result<(), EngineError> {
            Ok(())
        }

        fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult, Box<dyn std::error::Error>> {
            panic!("engine crashed");
        }
    }

    fn frame(index: usize) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, 3, index)
    }

    fn gated_worker() -> (
        DetectionWorker,
        Receiver<DetectionEvent>,
        Sender<DetectionResult>,
        Arc<Mutex<Option<EngineOptions>>>,
    ) {
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let configured = Arc::new(Mutex::new(None));
        let c = configured.clone();
        let (worker, events) = DetectionWorker::spawn(
            move || {
                Ok(Box::new(GatedEngine {
                    release_rx,
                    configured: c,
                }) as Box<dyn DetectionEngine>)
            },
            EngineOptions {
                model: ModelKind::Accurate,
                min_confidence: 0.4,
            },
        );
        (worker, events, release_tx, configured)
    }

    #[test]
    fn test_response_is_tagged_with_session() {
        let (worker, events, release, configured) = gated_worker();
        let submitter = worker.submitter();

        assert!(submitter.try_submit(SessionId::new(7), frame(3)));
        release.send(DetectionResult::with_faces(1, 0.8)).unwrap();

        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            DetectionEvent::Response(r) => {
                assert_eq!(r.session, SessionId::new(7));
                assert_eq!(r.result, DetectionResult::with_faces(1, 0.8));
                assert_eq!(r.frame.index(), 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            configured.lock().unwrap().unwrap().model,
            ModelKind::Accurate
        );
        worker.shutdown();
    }

    #[test]
    fn test_frames_are_dropped_while_request_in_flight() {
        let (worker, events, release, _) = gated_worker();
        let submitter = worker.submitter();

        assert!(submitter.try_submit(SessionId::new(1), frame(0)));
        assert!(submitter.in_flight());
        assert!(!submitter.try_submit(SessionId::new(1), frame(1)));
        assert!(!submitter.try_submit(SessionId::new(1), frame(2)));
        assert_eq!(submitter.frames_dropped(), 2);

        release.send(DetectionResult::empty()).unwrap();
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, DetectionEvent::Response(ref r) if r.frame.index() == 0));

        // The slot frees up once the response has been delivered.
        let deadline = Instant::now() + Duration::from_secs(5);
        while submitter.in_flight() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(submitter.try_submit(SessionId::new(1), frame(3)));
        release.send(DetectionResult::empty()).unwrap();
        drop(release);
        worker.shutdown();
    }

    #[test]
    fn test_engine_init_failure_reports_unavailable() {
        let (worker, events) = DetectionWorker::spawn(
            || Err(EngineError::EngineUnavailable("model missing".into())),
            EngineOptions::default(),
        );

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, DetectionEvent::EngineUnavailable(ref m) if m.contains("model missing")));

        // Submissions to a dead worker fail without wedging the in-flight slot.
        let submitter = worker.submitter();
        assert!(!submitter.try_submit(SessionId::new(1), frame(0)));
        assert!(!submitter.in_flight());
        assert_eq!(submitter.frames_dropped(), 1);
        worker.shutdown();
    }

    #[test]
    fn test_detect_error_is_reported_as_failed() {
        let (worker, events) = DetectionWorker::spawn(
            || Ok(Box::new(FailingEngine) as Box<dyn DetectionEngine>),
            EngineOptions::default(),
        );
        assert!(worker.submitter().try_submit(SessionId::new(2), frame(0)));

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            event,
            DetectionEvent::Failed { session, ref error }
                if session == SessionId::new(2) && error == "inference failed"
        ));
        worker.shutdown();
    }

    #[test]
    fn test_engine_panic_closes_event_channel() {
        let (worker, events) = DetectionWorker::spawn(
            || Ok(Box::new(PanickingEngine) as Box<dyn DetectionEngine>),
            EngineOptions::default(),
        );
        let submitter = worker.submitter();
        assert!(submitter.try_submit(SessionId::new(1), frame(0)));

        // The slot is never released, so the disconnect is the only signal.
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
        assert!(submitter.in_flight());
        assert!(!submitter.try_submit(SessionId::new(1), frame(1)));
        worker.shutdown();
    }
}
