use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::camera::domain::frame_source::{
    AcquisitionError, FrameCallback, FrameSource, FrameSourceConfig, FrameSourceHandle,
};
use crate::camera::infrastructure::running_stream::{RunningStream, StreamSink};
use crate::camera::infrastructure::viewport::fit_cover;
use crate::shared::frame::Frame;

/// Live frame source backed by ffmpeg-next (libavdevice + libavcodec).
///
/// `location` is anything ffmpeg can open: a device node such as
/// `/dev/video0` (with `input_format` set to `v4l2`), an `rtsp://` URL or a
/// video file. Decoded frames are converted to RGB24, fitted to the configured
/// viewport and paced to the stream's frame rate.
pub struct FfmpegFrameSource {
    location: String,
    input_format: Option<String>,
    config: FrameSourceConfig,
    next_id: u64,
    running: Option<RunningStream>,
}

impl FfmpegFrameSource {
    pub fn new(location: impl Into<String>, config: FrameSourceConfig) -> Self {
        Self {
            location: location.into(),
            input_format: None,
            config,
            next_id: 1,
            running: None,
        }
    }

    /// Forces an ffmpeg input device format (e.g. `v4l2`, `avfoundation`, `dshow`).
    pub fn with_input_format(mut self, format: impl Into<String>) -> Self {
        self.input_format = Some(format.into());
        self
    }
}

impl FrameSource for FfmpegFrameSource {
    fn start(&mut self, on_frame: FrameCallback) -> Result<FrameSourceHandle, AcquisitionError> {
        if self.running.is_some() {
            return Err(AcquisitionError::AlreadyStreaming);
        }

        let id = self.next_id;
        self.next_id += 1;

        let (mut stream, sink) = RunningStream::new(id, on_frame, self.config.mirrored);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AcquisitionError>>(1);

        let location = self.location.clone();
        let input_format = self.input_format.clone();
        let config = self.config;
        let thread = thread::Builder::new()
            .name(format!("ffmpeg-capture-{id}"))
            .spawn(move || {
                // ffmpeg contexts are not Send, so the input is opened on the
                // thread that decodes it and the outcome is reported back.
                let mut decoder = match Decoder::open(&location, input_format.as_deref()) {
                    Ok(d) => {
                        let _ = ready_tx.send(Ok(()));
                        d
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                decoder.run(&sink, config);
            })
            .map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;
        stream.attach(thread);

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(AcquisitionError::Unavailable(
                "capture thread exited before opening the device".into(),
            ))
        });
        if let Err(e) = opened {
            stream.halt();
            return Err(e);
        }

        log::info!("Streaming {} at {}x{}", self.location, config.width, config.height);
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

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        if let Some(stream) = self.running.take() {
            stream.halt();
        }
    }
}

/// Decode state living entirely on the capture thread.
struct Decoder {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    video_stream_index: usize,
    frame_interval: Option<Duration>,
    rewindable: bool,
}

impl Decoder {
    fn open(location: &str, input_format: Option<&str>) -> Result<Self, AcquisitionError> {
        ffmpeg_next::init().map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;

        let ictx = open_input(location, input_format).map_err(|e| classify(location, e))?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| {
                AcquisitionError::Unavailable(format!("{location}: no video stream found"))
            })?;

        let video_stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let frame_interval = if rate.numerator() > 0 && rate.denominator() > 0 {
            Some(Duration::from_secs_f64(
                rate.denominator() as f64 / rate.numerator() as f64,
            ))
        } else {
            None
        };

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg_next::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| AcquisitionError::Unavailable(e.to_string()))?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            video_stream_index,
            frame_interval,
            rewindable: input_format.is_none() && Path::new(location).is_file(),
        })
    }

    fn run(&mut self, sink: &StreamSink, config: FrameSourceConfig) {
        let mut index = 0usize;
        let mut last_emit: Option<Instant> = None;
        loop {
            let before = index;
            if !self.decode_to_end(sink, config, &mut index, &mut last_emit) {
                return;
            }
            match end_of_stream(self.rewindable, index - before) {
                EndOfStream::Rewind => {
                    log::debug!("Rewinding input after {} frames", index - before);
                    if let Err(e) = self.ictx.seek(0, ..) {
                        log::warn!("Frame source cannot rewind, no further frames: {e}");
                        return;
                    }
                    self.decoder.flush();
                }
                EndOfStream::Finish => {
                    log::warn!(
                        "Frame source ended after {index} frames, no further frames will arrive"
                    );
                    return;
                }
            }
        }
    }

    /// Decodes and publishes frames until the input is exhausted (`true`) or
    /// the stream is stopped (`false`).
    fn decode_to_end(
        &mut self,
        sink: &StreamSink,
        config: FrameSourceConfig,
        index: &mut usize,
        last_emit: &mut Option<Instant>,
    ) -> bool {
        let video_stream_index = self.video_stream_index;
        let mut packets = self.ictx.packets();
        loop {
            if sink.should_stop() {
                return false;
            }
            let Some((stream, packet)) = packets.next() else {
                return true;
            };
            if stream.index() != video_stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if sink.should_stop() {
                    return false;
                }
                let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
                if let Err(e) = self.scaler.run(&decoded, &mut rgb) {
                    log::warn!("Dropping undecodable frame: {e}");
                    continue;
                }

                pace(last_emit, self.frame_interval);

                let (w, h) = (rgb.width(), rgb.height());
                let pixels = extract_rgb_pixels(&rgb, w, h);
                let Some(img) = image::RgbImage::from_raw(w, h, pixels) else {
                    continue;
                };
                let fitted = fit_cover(&img, config.width, config.height);
                sink.publish(Frame::from_rgb_image(fitted, *index));
                *index += 1;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum EndOfStream {
    Rewind,
    Finish,
}

/// Files loop like the image-sequence source so a recorded clip behaves as a
/// camera. Devices and network streams that run dry are finished, as is a
/// file that produced no frames on its last pass.
fn end_of_stream(rewindable: bool, frames_this_pass: usize) -> EndOfStream {
    if rewindable && frames_this_pass > 0 {
        EndOfStream::Rewind
    } else {
        EndOfStream::Finish
    }
}

fn open_input(
    location: &str,
    input_format: Option<&str>,
) -> Result<ffmpeg_next::format::context::Input, ffmpeg_next::Error> {
    match input_format {
        None => ffmpeg_next::format::input(&location),
        Some(name) => {
            ffmpeg_next::device::register_all();
            let format = ffmpeg_next::device::input::video()
                .find(|f| f.name() == name)
                .ok_or(ffmpeg_next::Error::DemuxerNotFound)?;
            let ctx = ffmpeg_next::format::open_with(
                &location,
                &ffmpeg_next::format::format::Format::Input(format),
                ffmpeg_next::Dictionary::new(),
            )?;
            Ok(ctx.input())
        }
    }
}

fn classify(location: &str, e: ffmpeg_next::Error) -> AcquisitionError {
    let msg = e.to_string();
    if msg.contains("Permission denied") || msg.contains("Operation not permitted") {
        AcquisitionError::PermissionDenied(format!("{location}: {msg}"))
    } else {
        AcquisitionError::Unavailable(format!("{location}: {msg}"))
    }
}

/// Sleeps so frames are emitted no faster than the stream's frame rate.
/// Live devices already block on read, so this only throttles files.
fn pace(last_emit: &mut Option<Instant>, interval: Option<Duration>) {
    if let (Some(last), Some(interval)) = (*last_emit, interval) {
        let elapsed = last.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
    *last_emit = Some(Instant::now());
}

fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
