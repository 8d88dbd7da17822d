pub mod ffmpeg_frame_source;
pub mod image_sequence_frame_source;
mod running_stream;
mod viewport;
