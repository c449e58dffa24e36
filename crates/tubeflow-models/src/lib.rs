//! Shared data models for the TubeFlow pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - The `Video` aggregate and its lifecycle status
//! - Transcripts and generated content history
//! - Publish options and targets
//! - External platform credentials and user service keys

pub mod api_key;
pub mod content;
pub mod failure;
pub mod patch;
pub mod publish;
pub mod token;
pub mod transcript;
pub mod video;

// Re-export common types
pub use api_key::UserApiKey;
pub use content::{ContentCandidate, ContentKind, GenerationEntry, GenerationRequest};
pub use failure::{ErrorDetail, ErrorKind};
pub use patch::{GenerationChange, VideoPatch};
pub use publish::{PrivacyStatus, PublishMetadata, PublishOptions, PublishTarget};
pub use token::YouTubeToken;
pub use transcript::TranscriptSegment;
pub use video::{TransitionError, Video, VideoId, VideoSource, VideoStatus};
