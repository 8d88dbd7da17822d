use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("frame source is already streaming")]
    AlreadyStreaming,
    #[error("no frame has been captured yet")]
    NoFrame,
    #[error("unknown frame source handle {0}")]
    UnknownHandle(u64),
}

/// Called from the source's own thread for every produced frame.
pub type FrameCallback = Box<dyn Fn(Frame) + Send + Sync>;

/// Proof of a running stream, returned by [`FrameSource::start`].
///
/// Not `Clone`: [`FrameSource::stop`] consumes it, so a stream can only be
/// released once.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameSourceHandle(u64);

impl FrameSourceHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Capture geometry and orientation requested from a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSourceConfig {
    pub width: u32,
    pub height: u32,
    /// Flip frames horizontally so the user sees a mirror image.
    pub mirrored: bool,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            width: crate::shared::constants::DEFAULT_FRAME_WIDTH,
            height: crate::shared::constants::DEFAULT_FRAME_HEIGHT,
            mirrored: true,
        }
    }
}

/// A camera-like producer of frames.
///
/// Implementations produce frames at their own cadence on their own thread
/// and hand each one to the callback passed to `start`.
pub trait FrameSource: Send {
    fn start(&mut self, on_frame: FrameCallback) -> Result<FrameSourceHandle, AcquisitionError>;

    /// Stops producing frames. No callback runs after this returns.
    fn stop(&mut self, handle: FrameSourceHandle);

    /// Returns the most recent frame of the running stream.
    fn capture_still(&mut self, handle: &FrameSourceHandle) -> Result<Frame, AcquisitionError>;
}
