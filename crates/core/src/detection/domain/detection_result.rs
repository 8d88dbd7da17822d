/// One detection engine answer for a single submitted frame.
///
/// `best_confidence` is meaningful only when `faces_found > 0`; use
/// [`DetectionResult::normalized`] before evaluating untrusted values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionResult {
    pub faces_found: usize,
    pub best_confidence: Option<f64>,
}

impl DetectionResult {
    /// No faces in the frame.
    pub fn empty() -> Self {
        Self {
            faces_found: 0,
            best_confidence: None,
        }
    }

    pub fn with_faces(faces_found: usize, best_confidence: f64) -> Self {
        Self {
            faces_found,
            best_confidence: Some(best_confidence),
        }
    }

    /// Builds a result from the per-face confidences an engine produced.
    pub fn from_confidences<I>(confidences: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut faces_found = 0;
        let mut best: Option<f64> = None;
        for c in confidences {
            faces_found += 1;
            best = Some(best.map_or(c, |b| b.max(c)));
        }
        Self {
            faces_found,
            best_confidence: best,
        }
    }

    /// Makes the result internally consistent.
    ///
    /// A confidence reported alongside zero faces is dropped. NaN confidences
    /// are treated as absent.
    pub fn normalized(self) -> Self {
        if self.faces_found == 0 {
            return Self::empty();
        }
        Self {
            faces_found: self.faces_found,
            best_confidence: self.best_confidence.filter(|c| !c.is_nan()),
        }
    }
}
