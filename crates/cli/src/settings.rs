use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use facecapture_core::detection::domain::detection_engine::ModelKind;
use facecapture_core::shared::constants::{
    DEFAULT_ACCEPT_THRESHOLD, DEFAULT_DWELL, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH,
    DEFAULT_MIN_CONFIDENCE, DEFAULT_STORAGE_KEY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorModel {
    Fast,
    Accurate,
}

impl From<DetectorModel> for ModelKind {
    fn from(model: DetectorModel) -> Self {
        match model {
            DetectorModel::Fast => ModelKind::Fast,
            DetectorModel::Accurate => ModelKind::Accurate,
        }
    }
}

impl From<ModelKind> for DetectorModel {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Fast => DetectorModel::Fast,
            ModelKind::Accurate => DetectorModel::Accurate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub accept_threshold: f64,
    pub dwell_ms: u64,
    pub model: DetectorModel,
    pub min_confidence: f64,
    pub storage_key: String,
    pub output_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub mirrored: bool,
    /// Base URL model files are downloaded from when not found locally.
    pub model_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            dwell_ms: DEFAULT_DWELL.as_millis() as u64,
            model: DetectorModel::Fast,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            output_dir: None,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            mirrored: true,
            model_url: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceCapture").join("settings.json"))
    }

    /// Where captures go when no output directory is configured.
    pub fn default_output_dir() -> PathBuf {
        dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("FaceCapture")
    }

    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Missing or malformed files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(json) = fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed settings at {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::warn!("Failed to save settings to {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize settings: {e}"),
        }
    }
}
