use std::fmt;
use std::sync::Arc;

use crate::shared::frame::Frame;

pub const STATUS_IDLE: &str = "Camera ready";
pub const STATUS_POSITION_FACE: &str = "Position your face in the center...";
pub const STATUS_SEARCHING: &str = "Searching for face...";
pub const STATUS_CAPTURED: &str = "Photo captured! Please wait...";
pub const STATUS_COMPLETE: &str = "Success! Face detected and saved.";
pub const STATUS_ENGINE_LOADING: &str = "Loading face detection...";

/// Identifies one start-to-reset interaction.
///
/// Every detection response carries the id of the session whose frame it was
/// computed on, so responses outliving their session can be recognized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Processing,
    Complete,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Capturing => "capturing",
            Phase::Processing => "processing",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Visual affordance for the viewfinder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackLevel {
    Seeking,
    Detected,
    Busy,
}

impl FeedbackLevel {
    /// Border color of the oval viewfinder.
    pub fn border_color(self) -> &'static str {
        match self {
            FeedbackLevel::Seeking => "#dc3545",
            FeedbackLevel::Detected | FeedbackLevel::Busy => "#28a745",
        }
    }
}

/// The still produced by a session.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedArtifact {
    pub image: Arc<Frame>,
    /// Key the image was handed to the capture store under.
    pub storage_key: String,
}

/// Read-only view of the session handed to the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub phase: Phase,
    pub status_message: String,
    pub feedback_level: FeedbackLevel,
    pub captured_artifact: Option<CapturedArtifact>,
    /// Set when the last start attempt failed to acquire the camera.
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn can_start(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Cancel is only offered while searching; once a capture is underway
    /// the session runs to completion.
    pub fn can_cancel(&self) -> bool {
        self.phase == Phase::Capturing
    }

    pub fn can_reset(&self) -> bool {
        self.phase == Phase::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn snapshot(phase: Phase) -> SessionSnapshot {
        SessionSnapshot {
            session: SessionId::new(1),
            phase,
            status_message: String::new(),
            feedback_level: FeedbackLevel::Seeking,
            captured_artifact: None,
            error: None,
        }
    }

    #[rstest]
    #[case(Phase::Idle, true, false, false)]
    #[case(Phase::Capturing, false, true, false)]
    #[case(Phase::Processing, false, false, false)]
    #[case(Phase::Complete, false, false, true)]
    fn test_available_actions(
        #[case] phase: Phase,
        #[case] start: bool,
        #[case] cancel: bool,
        #[case] reset: bool,
    ) {
        let s = snapshot(phase);
        assert_eq!(s.can_start(), start);
        assert_eq!(s.can_cancel(), cancel);
        assert_eq!(s.can_reset(), reset);
    }

    #[test]
    fn test_border_colors() {
        assert_eq!(FeedbackLevel::Seeking.border_color(), "#dc3545");
        assert_eq!(FeedbackLevel::Detected.border_color(), "#28a745");
        assert_eq!(FeedbackLevel::Busy.border_color(), "#28a745");
    }

    #[test]
    fn test_session_id_ordering() {
        let a = SessionId::new(3);
        assert!(a.next() > a);
        assert_eq!(a.next().value(), 4);
        assert_eq!(a.to_string(), "#3");
    }
}
