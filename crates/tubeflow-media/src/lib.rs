//! FFmpeg and yt-dlp wrappers for the ingest and processing stages.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with progress parsing
//! - FFprobe inspection
//! - Remote source classification and capped downloads
//! - The `Transcoder` and `SpeechToText` seams used by the worker

pub mod command;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fs_utils;
pub mod probe;
pub mod source;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use config::MediaConfig;
pub use error::{MediaError, MediaResult};
pub use fetch::{FetchedMedia, RemoteFetcher};
pub use fs_utils::{move_file, remove_quietly};
pub use probe::{probe_media, MediaInfo};
pub use source::{RemoteSource, SourceKind, SourcePolicy};
pub use transcoder::{FfmpegTranscoder, SpeechToText, TranscodeOutput, Transcoder};
