//! Publishing options, resolved metadata and the resulting target.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::content::{ContentCandidate, ContentKind};
use crate::video::Video;

/// Title used when nothing was generated or supplied.
pub const DEFAULT_TITLE: &str = "Untitled Video";

/// YouTube category "People & Blogs".
pub const DEFAULT_CATEGORY_ID: &str = "22";

/// Platform title length limit.
pub const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    #[default]
    Private,
    Public,
    Unlisted,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Private => "private",
            PrivacyStatus::Public => "public",
            PrivacyStatus::Unlisted => "unlisted",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied publish options; unset fields fall back to generated content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublishOptions {
    #[serde(default)]
    pub privacy_status: PrivacyStatus,

    /// Scheduled publication time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,

    /// Skip setting the generated thumbnail
    #[serde(default)]
    pub skip_thumbnail: bool,
}

/// Metadata sent with the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: PrivacyStatus,
    pub publish_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub playlist_id: Option<String>,
}

impl PublishMetadata {
    /// Resolve metadata from options and the latest generated content.
    ///
    /// A future `publish_at` forces `private`: the platform only schedules
    /// private uploads.
    pub fn resolve(video: &Video, options: &PublishOptions, now: DateTime<Utc>) -> Self {
        let latest_text = |kind: ContentKind| {
            video
                .latest_content(kind)
                .and_then(|entry| entry.primary())
                .map(|candidate| candidate.as_text().trim().to_string())
                .filter(|text| !text.is_empty())
        };

        let title = options
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| latest_text(ContentKind::Title))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let title: String = title.chars().take(MAX_TITLE_CHARS).collect();

        let mut description = options
            .description
            .clone()
            .or_else(|| latest_text(ContentKind::Description))
            .unwrap_or_default();
        if let Some(chapters) = latest_text(ContentKind::Timestamps) {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str(&chapters);
        }

        let thumbnail_url = if options.skip_thumbnail {
            None
        } else {
            video
                .latest_content(ContentKind::Thumbnail)
                .and_then(|entry| entry.primary())
                .and_then(|candidate| match candidate {
                    ContentCandidate::Image { url, .. } => Some(url.clone()),
                    ContentCandidate::Text { .. } => None,
                })
        };

        let publish_at = options.publish_at.filter(|at| *at > now);
        let privacy_status = if publish_at.is_some() {
            PrivacyStatus::Private
        } else {
            options.privacy_status
        };

        Self {
            title,
            description,
            tags: options.tags.clone(),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy_status,
            publish_at,
            thumbnail_url,
            playlist_id: options.playlist_id.clone(),
        }
    }
}

/// Where the video ended up after a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublishTarget {
    pub external_video_id: String,
    pub privacy_status: PrivacyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<DateTime<Utc>>,
    pub published_at: DateTime<Utc>,
}

impl PublishTarget {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.external_video_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::content::GenerationEntry;
    use crate::video::VideoSource;

    fn video_with_content() -> Video {
        let mut video = Video::new("user-1", VideoSource::remote("https://youtu.be/x"));
        video.generated_content.insert(
            ContentKind::Title,
            vec![GenerationEntry::new(vec![ContentCandidate::text("Rust in 10 minutes")], None, None)],
        );
        video.generated_content.insert(
            ContentKind::Timestamps,
            vec![GenerationEntry::new(
                vec![ContentCandidate::text("00:00 Intro\n01:00 Ownership")],
                None,
                None,
            )],
        );
        video.generated_content.insert(
            ContentKind::Thumbnail,
            vec![GenerationEntry::new(
                vec![ContentCandidate::image("https://img.example/1.png", "crab")],
                None,
                None,
            )],
        );
        video
    }

    #[test]
    fn test_resolve_uses_latest_generated_content() {
        let now = Utc::now();
        let meta = PublishMetadata::resolve(&video_with_content(), &PublishOptions::default(), now);
        assert_eq!(meta.title, "Rust in 10 minutes");
        assert_eq!(meta.description, "00:00 Intro\n01:00 Ownership");
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://img.example/1.png"));
        assert_eq!(meta.category_id, "22");
    }

    #[test]
    fn test_resolve_defaults_title() {
        let video = Video::new("user-1", VideoSource::remote("https://youtu.be/x"));
        let meta = PublishMetadata::resolve(&video, &PublishOptions::default(), Utc::now());
        assert_eq!(meta.title, DEFAULT_TITLE);
        assert!(meta.thumbnail_url.is_none());
    }

    #[test]
    fn test_scheduled_publish_forces_private() {
        let now = Utc::now();
        let options = PublishOptions {
            privacy_status: PrivacyStatus::Public,
            publish_at: Some(now + Duration::hours(2)),
            ..Default::default()
        };
        let meta = PublishMetadata::resolve(&video_with_content(), &options, now);
        assert_eq!(meta.privacy_status, PrivacyStatus::Private);
        assert!(meta.publish_at.is_some());

        let past = PublishOptions {
            privacy_status: PrivacyStatus::Public,
            publish_at: Some(now - Duration::hours(2)),
            ..Default::default()
        };
        let meta = PublishMetadata::resolve(&video_with_content(), &past, now);
        assert_eq!(meta.privacy_status, PrivacyStatus::Public);
        assert!(meta.publish_at.is_none());
    }
}
