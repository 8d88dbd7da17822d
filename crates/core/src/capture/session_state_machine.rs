use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::domain::frame_source::{AcquisitionError, FrameSource, FrameSourceHandle};
use crate::capture::domain::capture_gate::{CaptureGate, Decision, GatePolicy};
use crate::capture::domain::session::{
    CapturedArtifact, FeedbackLevel, Phase, SessionId, SessionSnapshot, STATUS_CAPTURED,
    STATUS_COMPLETE, STATUS_ENGINE_LOADING, STATUS_IDLE, STATUS_POSITION_FACE, STATUS_SEARCHING,
};
use crate::detection::domain::detection_dispatch::{DetectionDispatch, DetectionResponse};
use crate::persistence::domain::capture_store::CaptureStore;
use crate::shared::constants::{DEFAULT_DWELL, DEFAULT_STORAGE_KEY};
use crate::shared::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub policy: GatePolicy,
    /// How long Processing is held before the result is revealed.
    pub dwell: Duration,
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: GatePolicy::default(),
            dwell: DEFAULT_DWELL,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Owns the phase of the capture interaction and every side effect tied to
/// a phase change.
///
/// Transitions:
///
/// ```text
/// Idle --start--> Capturing --accept--> Processing --dwell--> Complete
///   ^                |                                           |
///   +----cancel------+-------------------reset-------------------+
/// ```
///
/// Triggers arriving in any other phase are ignored. Detection responses are
/// additionally matched against the current [`SessionId`], so a response
/// computed for a cancelled session can never touch its successor.
///
/// The machine is the only owner of the frame source handle; the handle is
/// released on every exit from Capturing.
pub struct SessionStateMachine {
    config: SessionConfig,
    frame_source: Box<dyn FrameSource>,
    store: Box<dyn CaptureStore>,
    dispatch: Arc<dyn DetectionDispatch>,

    session: SessionId,
    phase: Phase,
    gate: CaptureGate,
    stream: Option<FrameSourceHandle>,
    dwell_deadline: Option<Instant>,
    pending_artifact: Option<CapturedArtifact>,
    captured_artifact: Option<CapturedArtifact>,
    status_message: String,
    feedback_level: FeedbackLevel,
    error: Option<String>,
    engine_available: bool,
}

impl SessionStateMachine {
    pub fn new(
        config: SessionConfig,
        frame_source: Box<dyn FrameSource>,
        store: Box<dyn CaptureStore>,
        dispatch: Arc<dyn DetectionDispatch>,
    ) -> Self {
        let gate = CaptureGate::disarmed(config.policy);
        Self {
            config,
            frame_source,
            store,
            dispatch,
            session: SessionId::new(1),
            phase: Phase::Idle,
            gate,
            stream: None,
            dwell_deadline: None,
            pending_artifact: None,
            captured_artifact: None,
            status_message: STATUS_IDLE.to_string(),
            feedback_level: FeedbackLevel::Seeking,
            error: None,
            engine_available: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn gate(&self) -> &CaptureGate {
        &self.gate
    }

    /// Idle → Capturing. Acquires the frame source and arms a fresh gate.
    ///
    /// On acquisition failure the session stays Idle with an error status
    /// and the error is returned.
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.phase != Phase::Idle {
            log::debug!("Ignoring start in {} phase", self.phase);
            return Ok(());
        }

        let session = self.session;
        let dispatch = self.dispatch.clone();
        let started = self.frame_source.start(Box::new(move |frame: Frame| {
            dispatch.submit(session, frame);
        }));

        let handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Session {session}: camera acquisition failed: {e}");
                self.status_message = format!("Camera unavailable: {e}");
                self.feedback_level = FeedbackLevel::Seeking;
                self.error = Some(e.to_string());
                return Err(e);
            }
        };

        self.stream = Some(handle);
        self.gate = CaptureGate::armed(self.config.policy);
        self.error = None;
        self.feedback_level = FeedbackLevel::Seeking;
        self.status_message = if self.engine_available {
            STATUS_POSITION_FACE.to_string()
        } else {
            STATUS_ENGINE_LOADING.to_string()
        };
        self.transition(Phase::Capturing);
        Ok(())
    }

    /// Capturing → Idle. Stops the frame source; responses still in flight
    /// for this session are ignored when they arrive.
    pub fn cancel(&mut self) {
        if self.phase != Phase::Capturing {
            log::debug!("Ignoring cancel in {} phase", self.phase);
            return;
        }
        self.release_stream();
        self.begin_idle_session();
    }

    /// Complete → Idle. Clears the captured artifact.
    pub fn reset(&mut self) {
        if self.phase != Phase::Complete {
            log::debug!("Ignoring reset in {} phase", self.phase);
            return;
        }
        self.captured_artifact = None;
        self.begin_idle_session();
    }

    /// Feeds one detection response through the gate.
    ///
    /// Returns the gate's decision, or `None` when the response belongs to
    /// another session or arrived outside Capturing.
    pub fn handle_detection(&mut self, response: DetectionResponse, now: Instant) -> Option<Decision> {
        if response.session != self.session {
            log::debug!(
                "Discarding response for session {} (current {})",
                response.session,
                self.session
            );
            return None;
        }
        if self.phase != Phase::Capturing {
            log::debug!("Discarding late response in {} phase", self.phase);
            return None;
        }

        self.engine_available = true;
        let decision = self.gate.submit(response.result);
        log::debug!(
            "Session {}: {:?} (faces: {}, best: {:?})",
            self.session,
            decision,
            response.result.faces_found,
            response.result.best_confidence
        );

        match decision {
            Decision::Reject => {
                self.feedback_level = FeedbackLevel::Seeking;
                self.status_message = STATUS_SEARCHING.to_string();
            }
            Decision::Accept => self.begin_processing(&response.frame, now),
        }
        Some(decision)
    }

    /// Records that the detection engine failed to initialize.
    ///
    /// A capturing session keeps running with a persistent loading status;
    /// the user can still cancel.
    pub fn engine_unavailable(&mut self, reason: &str) {
        log::warn!("Face detection unavailable: {reason}");
        self.engine_available = false;
        if self.phase == Phase::Capturing {
            self.feedback_level = FeedbackLevel::Seeking;
            self.status_message = STATUS_ENGINE_LOADING.to_string();
        }
    }

    /// Advances timers. Processing becomes Complete once the dwell period
    /// has elapsed at `now`. Returns whether the phase changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match (self.phase, self.dwell_deadline) {
            (Phase::Processing, Some(deadline)) if now >= deadline => {
                self.complete();
                true
            }
            _ => false,
        }
    }

    /// When the next timer fires, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.dwell_deadline
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session,
            phase: self.phase,
            status_message: self.status_message.clone(),
            feedback_level: self.feedback_level,
            captured_artifact: self.captured_artifact.clone(),
            error: self.error.clone(),
        }
    }

    fn begin_processing(&mut self, evaluated: &Arc<Frame>, now: Instant) {
        let still = match self.stream.as_ref() {
            Some(handle) => match self.frame_source.capture_still(handle) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Still capture failed ({e}); using the detected frame");
                    evaluated.as_ref().clone()
                }
            },
            None => evaluated.as_ref().clone(),
        };
        self.release_stream();

        if let Err(e) = self.store.save(&self.config.storage_key, &still) {
            log::warn!("Failed to persist capture '{}': {e}", self.config.storage_key);
        }

        self.pending_artifact = Some(CapturedArtifact {
            image: Arc::new(still),
            storage_key: self.config.storage_key.clone(),
        });
        self.dwell_deadline = Some(now + self.config.dwell);
        self.feedback_level = FeedbackLevel::Busy;
        self.status_message = STATUS_CAPTURED.to_string();
        self.transition(Phase::Processing);
    }

    fn complete(&mut self) {
        self.release_stream();
        self.dwell_deadline = None;
        self.captured_artifact = self.pending_artifact.take();
        self.feedback_level = FeedbackLevel::Detected;
        self.status_message = STATUS_COMPLETE.to_string();
        self.transition(Phase::Complete);
    }

    /// Replaces the current session with a fresh Idle one.
    fn begin_idle_session(&mut self) {
        self.session = self.session.next();
        self.gate = CaptureGate::disarmed(self.config.policy);
        self.dwell_deadline = None;
        self.pending_artifact = None;
        self.error = None;
        self.feedback_level = FeedbackLevel::Seeking;
        self.status_message = STATUS_IDLE.to_string();
        self.transition(Phase::Idle);
    }

    fn release_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            self.frame_source.stop(handle);
        }
    }

    fn transition(&mut self, to: Phase) {
        log::debug!("Session {}: {} -> {}", self.session, self.phase, to);
        self.phase = to;
        debug_assert_eq!(
            self.captured_artifact.is_some(),
            self.phase == Phase::Complete,
            "captured artifact must be present exactly in Complete"
        );
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        self.release_stream();
    }
}
