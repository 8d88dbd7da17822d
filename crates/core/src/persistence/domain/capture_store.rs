use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("failed to encode capture: {0}")]
    Encode(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores captured stills under a caller-chosen key for later retrieval.
pub trait CaptureStore: Send {
    /// Saves `image` under `key`, replacing any previous capture.
    fn save(&mut self, key: &str, image: &Frame) -> Result<(), PersistenceError>;

    /// Returns the capture stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<Frame>, PersistenceError>;
}
