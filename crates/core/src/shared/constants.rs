use std::time::Duration;

pub const BLAZEFACE_SHORT_MODEL_NAME: &str = "blazeface_short_range.onnx";
pub const BLAZEFACE_FULL_MODEL_NAME: &str = "blazeface_full_range.onnx";

/// Minimum best-face confidence that triggers a capture.
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.6;

/// Score below which the detector does not report a face at all.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// How long the "captured" feedback stays on screen before the result view.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(3);

pub const DEFAULT_STORAGE_KEY: &str = "saved_face";

/// Default capture geometry (portrait, matches the oval viewfinder).
pub const DEFAULT_FRAME_WIDTH: u32 = 300;
pub const DEFAULT_FRAME_HEIGHT: u32 = 400;

/// Replay cadence for image-sequence sources (~30 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
