use std::io::Write;
use std::path::PathBuf;

use crate::persistence::domain::capture_store::{CaptureStore, PersistenceError};
use crate::shared::frame::Frame;

/// JPEG quality used for stored captures.
const JPEG_QUALITY: u8 = 92;

/// Stores each capture as `<dir>/<key>.jpg` using the `image` crate.
pub struct ImageFileCaptureStore {
    dir: PathBuf,
}

impl ImageFileCaptureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path a key maps to. Keys are restricted to a safe file-name
    /// alphabet so they cannot escape the store directory.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.jpg")))
    }
}

impl CaptureStore for ImageFileCaptureStore {
    fn save(&mut self, key: &str, image: &Frame) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let img = image
            .to_rgb_image()
            .ok_or_else(|| PersistenceError::Encode("frame is not RGB".into()))?;

        // Write next to the target and rename so readers never see a torn file.
        let temp_path = path.with_extension("part");
        let file = std::fs::File::create(&temp_path)?;
        let mut writer = std::io::BufWriter::new(file);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        if let Err(e) = img.write_with_encoder(encoder) {
            drop(writer);
            let _ = std::fs::remove_file(&temp_path);
            return Err(PersistenceError::Encode(e.to_string()));
        }
        writer.flush()?;
        drop(writer);
        std::fs::rename(&temp_path, &path)?;

        log::debug!("Saved capture '{key}' to {}", path.display());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Frame>, PersistenceError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let img = image::open(&path)
            .map_err(|e| PersistenceError::Encode(e.to_string()))?
            .to_rgb8();
        Ok(Some(Frame::from_rgb_image(img, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn make_frame(width: u32, height: u32, r: u8, g: u8, b: u8) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&[r, g, b]);
        }
        Frame::new(data, width, height, 3, 0)
    }

    #[test]
    fn test_save_creates_jpeg_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageFileCaptureStore::new(dir.path().join("captures"));
        store.save("saved_face", &make_frame(30, 40, 50, 100, 200)).unwrap();

        let path = dir.path().join("captures").join("saved_face.jpg");
        assert!(path.exists());
        assert!(!path.with_extension("part").exists());
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (30, 40));
    }

    #[test]
    fn test_load_returns_saved_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageFileCaptureStore::new(dir.path());
        store.save("face", &make_frame(16, 16, 128, 128, 128)).unwrap();

        let loaded = store.load("face").unwrap().unwrap();
        assert_eq!((loaded.width(), loaded.height()), (16, 16));
        // JPEG is lossy; a flat gray survives within a small tolerance.
        let px = loaded.data()[0] as i32;
        assert!((px - 128).abs() <= 3, "got {px}");
    }

    #[test]
    fn test_load_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageFileCaptureStore::new(dir.path());
        assert!(store.load("nothing").unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_previous_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageFileCaptureStore::new(dir.path());
        store.save("face", &make_frame(8, 8, 0, 0, 0)).unwrap();
        store.save("face", &make_frame(12, 10, 0, 0, 0)).unwrap();
        let loaded = store.load("face").unwrap().unwrap();
        assert_eq!((loaded.width(), loaded.height()), (12, 10));
    }

    #[rstest]
    #[case::empty("")]
    #[case::traversal("../escape")]
    #[case::separator("a/b")]
    #[case::dot("face.jpg")]
    fn test_invalid_keys_are_rejected(#[case] key: &str) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageFileCaptureStore::new(dir.path());
        let err = store.save(key, &make_frame(2, 2, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidKey(_)));
    }

    #[test]
    fn test_non_rgb_frame_is_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageFileCaptureStore::new(dir.path());
        let gray = Frame::new(vec![0u8; 4], 2, 2, 1, 0);
        assert!(matches!(
            store.save("face", &gray),
            Err(PersistenceError::Encode(_))
        ));
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut store = ImageFileCaptureStore::new(blocker.join("sub"));
        assert!(matches!(
            store.save("face", &make_frame(2, 2, 0, 0, 0)),
            Err(PersistenceError::Io(_))
        ));
    }
}
