use crate::detection::domain::detection_result::DetectionResult;
use crate::shared::constants::DEFAULT_ACCEPT_THRESHOLD;

/// Classification of one detection result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Reject,
    Accept,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GatePolicy {
    pub accept_threshold: f64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
        }
    }
}

impl GatePolicy {
    pub fn new(accept_threshold: f64) -> Self {
        Self { accept_threshold }
    }

    /// Whether a normalized result is strong enough to capture on.
    ///
    /// Any number of faces is accepted as long as the best one clears the
    /// threshold.
    pub fn accepts(&self, result: &DetectionResult) -> bool {
        result.faces_found > 0
            && result
                .best_confidence
                .is_some_and(|c| c >= self.accept_threshold)
    }
}

/// Turns a stream of detection results into at most one capture trigger.
///
/// The gate is armed when a session starts and disarms itself on the first
/// accepted result. Once disarmed, every `submit` is a no-op returning
/// `Reject`, however many results were already in flight.
#[derive(Clone, Debug)]
pub struct CaptureGate {
    policy: GatePolicy,
    armed: bool,
    last_decision: Option<Decision>,
}

impl CaptureGate {
    /// A fresh gate for a new session.
    pub fn armed(policy: GatePolicy) -> Self {
        Self {
            policy,
            armed: true,
            last_decision: None,
        }
    }

    /// A gate that never triggers; held while no session is capturing.
    pub fn disarmed(policy: GatePolicy) -> Self {
        Self {
            policy,
            armed: false,
            last_decision: None,
        }
    }

    pub fn submit(&mut self, result: DetectionResult) -> Decision {
        if !self.armed {
            return Decision::Reject;
        }

        let result = result.normalized();
        let decision = if self.policy.accepts(&result) {
            self.armed = false;
            Decision::Accept
        } else {
            Decision::Reject
        };
        self.last_decision = Some(decision);
        decision
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }
}
