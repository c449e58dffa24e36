//! AI-generated content and generation requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::VideoId;

/// Kind of content generated from a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Title,
    Description,
    Thumbnail,
    Timestamps,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::Title,
        ContentKind::Description,
        ContentKind::Thumbnail,
        ContentKind::Timestamps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Title => "title",
            ContentKind::Description => "description",
            ContentKind::Thumbnail => "thumbnail",
            ContentKind::Timestamps => "timestamps",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "title" | "titles" => Ok(ContentKind::Title),
            "description" => Ok(ContentKind::Description),
            "thumbnail" => Ok(ContentKind::Thumbnail),
            "timestamps" | "chapters" => Ok(ContentKind::Timestamps),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

/// A single generated candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentCandidate {
    Text { text: String },
    /// Reference to a rendered image plus the prompt that produced it
    Image { url: String, prompt: String },
}

impl ContentCandidate {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::Image {
            url: url.into(),
            prompt: prompt.into(),
        }
    }

    /// Text payload, or the image URL for image candidates.
    pub fn as_text(&self) -> &str {
        match self {
            ContentCandidate::Text { text } => text,
            ContentCandidate::Image { url, .. } => url,
        }
    }
}

/// One generate call's result, kept in the video's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationEntry {
    pub candidates: Vec<ContentCandidate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_candidate: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl GenerationEntry {
    pub fn new(
        candidates: Vec<ContentCandidate>,
        requirements: Option<String>,
        prior_candidate: Option<String>,
    ) -> Self {
        Self {
            candidates,
            requirements,
            prior_candidate,
            created_at: Utc::now(),
        }
    }

    /// First candidate, the one used by default when publishing.
    pub fn primary(&self) -> Option<&ContentCandidate> {
        self.candidates.first()
    }
}

/// Ephemeral request to generate (or refine) content for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationRequest {
    pub video_id: VideoId,
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_candidate: Option<String>,
}

impl GenerationRequest {
    pub fn new(video_id: VideoId, kind: ContentKind) -> Self {
        Self {
            video_id,
            kind,
            requirements: None,
            prior_candidate: None,
        }
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    pub fn with_prior_candidate(mut self, prior: impl Into<String>) -> Self {
        self.prior_candidate = Some(prior.into());
        self
    }

    /// Whether this refines earlier output rather than starting fresh.
    pub fn is_refinement(&self) -> bool {
        self.prior_candidate.is_some() || self.requirements.is_some()
    }
}
