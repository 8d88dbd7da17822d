use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::camera::domain::frame_source::{
    AcquisitionError, FrameCallback, FrameSourceHandle,
};
use crate::shared::frame::Frame;

/// Book-keeping shared by thread-backed frame sources: the stop flag, the
/// latest published frame and the producer thread.
pub(crate) struct RunningStream {
    id: u64,
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Frame>>>,
    thread: Option<JoinHandle<()>>,
}

/// The producer-side view of a [`RunningStream`].
#[derive(Clone)]
pub(crate) struct StreamSink {
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Frame>>>,
    on_frame: Arc<FrameCallback>,
    mirrored: bool,
}

impl StreamSink {
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Stores the frame as the latest still and forwards it to the callback.
    pub fn publish(&self, frame: Frame) {
        if self.should_stop() {
            return;
        }
        let frame = if self.mirrored { frame.mirrored() } else { frame };
        if let Ok(mut slot) = self.latest.lock() {
            *slot = Some(frame.clone());
        }
        (self.on_frame.as_ref())(frame);
    }
}

impl RunningStream {
    pub fn new(id: u64, on_frame: FrameCallback, mirrored: bool) -> (Self, StreamSink) {
        let stop = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));
        let sink = StreamSink {
            stop: stop.clone(),
            latest: latest.clone(),
            on_frame: Arc::new(on_frame),
            mirrored,
        };
        (
            Self {
                id,
                stop,
                latest,
                thread: None,
            },
            sink,
        )
    }

    pub fn attach(&mut self, thread: JoinHandle<()>) {
        self.thread = Some(thread);
    }

    pub fn handle(&self) -> FrameSourceHandle {
        FrameSourceHandle::new(self.id)
    }

    pub fn matches(&self, handle: &FrameSourceHandle) -> bool {
        self.id == handle.id()
    }

    pub fn latest(&self) -> Result<Frame, AcquisitionError> {
        self.latest
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(AcquisitionError::NoFrame)
    }

    /// Signals the producer and waits for it to exit.
    pub fn halt(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Frame source thread {} panicked", self.id);
            }
        }
    }
}
