use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::camera::domain::frame_source::{
    AcquisitionError, FrameCallback, FrameSource, FrameSourceConfig, FrameSourceHandle,
};
use crate::camera::infrastructure::running_stream::RunningStream;
use crate::camera::infrastructure::viewport::fit_cover;
use crate::shared::constants::{DEFAULT_FRAME_INTERVAL, IMAGE_EXTENSIONS};
use crate::shared::frame::Frame;

/// Replays a directory of still images as a looping camera stream.
///
/// Images are decoded once at `start`, fitted to the configured viewport and
/// then emitted in file-name order every `interval`.
pub struct ImageSequenceFrameSource {
    dir: PathBuf,
    config: FrameSourceConfig,
    interval: Duration,
    next_id: u64,
    running: Option<RunningStream>,
}

impl ImageSequenceFrameSource {
    pub fn new(dir: impl Into<PathBuf>, config: FrameSourceConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            interval: DEFAULT_FRAME_INTERVAL,
            next_id: 1,
            running: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn load_frames(&self) -> Result<Vec<Frame>, AcquisitionError> {
        let paths = list_images(&self.dir)?;
        if paths.is_empty() {
            return Err(AcquisitionError::Unavailable(format!(
                "no images found in {}",
                self.dir.display()
            )));
        }

        paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let img = image::open(path)
                    .map_err(|e| {
                        AcquisitionError::Unavailable(format!("{}: {e}", path.display()))
                    })?
                    .to_rgb8();
                let fitted = fit_cover(&img, self.config.width, self.config.height);
                Ok(Frame::from_rgb_image(fitted, i))
            })
            .collect()
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, AcquisitionError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            AcquisitionError::PermissionDenied(format!("{}: {e}", dir.display()))
        }
        _ => AcquisitionError::Unavailable(format!("{}: {e}", dir.display())),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image(p))
        .collect();
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceFrameSource {
    fn start(&mut self, on_frame: FrameCallback) -> Result<FrameSourceHandle, AcquisitionError> {
        if self.running.is_some() {
            return Err(AcquisitionError::AlreadyStreaming);
        }

        let frames = self.load_frames()?;
        let id = self.next_id;
        self.next_id += 1;

        let (mut stream, sink) = RunningStream::new(id, on_frame, self.config.mirrored);
        let interval = self.interval;
        let thread = thread::Builder::new()
            .name(format!("image-sequence-{id}"))
            .spawn(move || {
                let mut sequence = 0usize;
                for frame in frames.iter().cycle() {
                    if sink.should_stop() {
                        break;
                    }
                    let data = frame.data().to_vec();
                    sink.publish(Frame::new(
                        data,
                        frame.width(),
                        frame.height(),
                        frame.channels(),
                        sequence,
                    ));
                    sequence += 1;
                    thread::sleep(interval);
                }
            })
            .map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;
        stream.attach(thread);

        log::info!(
            "Replaying {} at {}x{}",
            self.dir.display(),
            self.config.width,
            self.config.height
        );
        let handle = stream.handle();
        self.running = Some(stream);
        Ok(handle)
    }

    fn stop(&mut self, handle: FrameSourceHandle) {
        match self.running.take() {
            Some(stream) if stream.matches(&handle) => stream.halt(),
            Some(stream) => {
                log::warn!("Ignoring stop for stale handle {}", handle.id());
                self.running = Some(stream);
            }
            None => {}
        }
    }

    fn capture_still(&mut self, handle: &FrameSourceHandle) -> Result<Frame, AcquisitionError> {
        match &self.running {
            Some(stream) if stream.matches(handle) => stream.latest(),
            _ => Err(AcquisitionError::UnknownHandle(handle.id())),
        }
    }
}

impl Drop for ImageSequenceFrameSource {
    fn drop(&mut self) {
        if let Some(stream) = self.running.take() {
            stream.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn write_image(dir: &Path, name: &str, color: [u8; 3]) {
        let img = image::RgbImage::from_pixel(60, 80, image::Rgb(color));
        img.save(dir.join(name)).unwrap();
    }

    fn config() -> FrameSourceConfig {
        FrameSourceConfig {
            width: 30,
            height: 40,
            mirrored: false,
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_missing_directory_is_acquisition_error() {
        let mut source = ImageSequenceFrameSource::new("/nonexistent/frames", config());
        let result = source.start(Box::new(|_| {}));
        assert!(matches!(result, Err(AcquisitionError::Unavailable(_))));
    }

    #[test]
    fn test_directory_without_images_is_acquisition_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let mut source = ImageSequenceFrameSource::new(dir.path(), config());
        assert!(matches!(
            source.start(Box::new(|_| {})),
            Err(AcquisitionError::Unavailable(_))
        ));
    }

    #[test]
    fn test_streams_fitted_frames_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [200, 10, 10]);
        write_image(dir.path(), "b.png", [10, 200, 10]);

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut source = ImageSequenceFrameSource::new(dir.path(), config())
            .with_interval(Duration::from_millis(1));
        let handle = source
            .start(Box::new(move |frame| {
                assert_eq!((frame.width(), frame.height()), (30, 40));
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || count.load(Ordering::SeqCst) >= 3));
        let still = source.capture_still(&handle).unwrap();
        assert_eq!((still.width(), still.height()), (30, 40));

        source.stop(handle);
        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_second_start_while_streaming_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [1, 2, 3]);
        let mut source = ImageSequenceFrameSource::new(dir.path(), config());
        let handle = source.start(Box::new(|_| {})).unwrap();
        assert!(matches!(
            source.start(Box::new(|_| {})),
            Err(AcquisitionError::AlreadyStreaming)
        ));
        source.stop(handle);
        let again = source.start(Box::new(|_| {})).unwrap();
        assert_eq!(again.id(), 2);
        source.stop(again);
    }

    #[test]
    fn test_capture_still_with_stale_handle_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", [1, 2, 3]);
        let mut source = ImageSequenceFrameSource::new(dir.path(), config());
        let handle = source.start(Box::new(|_| {})).unwrap();
        let stale = FrameSourceHandle::new(99);
        assert!(matches!(
            source.capture_still(&stale),
            Err(AcquisitionError::UnknownHandle(99))
        ));
        source.stop(handle);
    }
}
