//! AI content generation for TubeFlow.
//!
//! - [`ContentGenerator`]: titles, descriptions, chapter timestamps and
//!   thumbnail references from a transcript excerpt
//! - [`GeminiClient`]: the Gemini-backed implementation, with input size
//!   limits, per-call timeouts and bounded retry on transient failures
//! - [`GeminiSpeechToText`]: the transcription step of the media pipeline

pub mod config;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod speech;
pub mod thumbnail;

pub use config::GeminiConfig;
pub use error::{AiError, AiResult};
pub use gemini::{GeminiClient, Part};
pub use generator::{ContentGenerator, MAX_TITLE_CANDIDATES};
pub use speech::GeminiSpeechToText;
pub use thumbnail::image_url;
