pub mod ffmpeg;

pub use ffmpeg::FfmpegBackend;
