use std::sync::Arc;
use std::time::Duration;

use crate::capture::domain::session::SessionId;
use crate::detection::domain::detection_result::DetectionResult;
use crate::shared::frame::Frame;

/// Answer to one tagged detection request.
#[derive(Clone, Debug)]
pub struct DetectionResponse {
    /// Session whose frame was evaluated.
    pub session: SessionId,
    pub result: DetectionResult,
    /// The evaluated frame, kept as a fallback still.
    pub frame: Arc<Frame>,
    pub latency: Duration,
}

/// Everything the detection side reports back to the session loop.
#[derive(Clone, Debug)]
pub enum DetectionEvent {
    Response(DetectionResponse),
    /// Detection failed for one frame; the session keeps searching.
    Failed { session: SessionId, error: String },
    /// The engine never came up; no responses will follow.
    EngineUnavailable(String),
}

/// Asynchronous submission port: hands a frame to the detection engine and
/// returns immediately.
///
/// At most one request is outstanding at a time. Frames offered while a
/// request is in flight are dropped, and `submit` reports `false`.
pub trait DetectionDispatch: Send + Sync {
    fn submit(&self, session: SessionId, frame: Frame) -> bool;
}
