pub mod ffmpeg;
pub mod progress;
pub mod scratch;
