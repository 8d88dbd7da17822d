use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::detection::domain::detection_result::DetectionResult;
use crate::shared::constants::DEFAULT_MIN_CONFIDENCE;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be initialized (missing model, runtime failure).
    #[error("detection engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("invalid engine options: {0}")]
    InvalidOptions(String),
}

/// Which detection model variant to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Short-range model, tuned for a face close to the camera.
    #[default]
    Fast,
    /// Full-range model, slower but tolerant of smaller faces.
    Accurate,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Fast => write!(f, "fast"),
            ModelKind::Accurate => write!(f, "accurate"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(ModelKind::Fast),
            "accurate" => Ok(ModelKind::Accurate),
            other => Err(EngineError::InvalidOptions(format!(
                "model must be 'fast' or 'accurate', got '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineOptions {
    pub model: ModelKind,
    /// Faces scoring below this are not reported at all.
    pub min_confidence: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: ModelKind::Fast,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Domain interface for the face detection engine.
///
/// Calls are blocking; the asynchronous request/response behavior is
/// provided by [`DetectionWorker`](crate::detection::infrastructure::detection_worker::DetectionWorker),
/// which runs the engine off the session thread.
pub trait DetectionEngine: Send {
    fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError>;

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult, Box<dyn std::error::Error>>;
}
