//! Transcript-driven content generation.
//!
//! The generator forwards the transcript excerpt plus any prior candidate and
//! user requirements; it does not decide whether a call is a first
//! generation or a refinement.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use tubeflow_models::publish::MAX_TITLE_CHARS;
use tubeflow_models::transcript::normalize_chapter_lines;
use tubeflow_models::{ContentCandidate, ContentKind};

use crate::error::{AiError, AiResult};
use crate::gemini::{GeminiClient, Part};
use crate::thumbnail::{fresh_seed, image_url};

/// Most title candidates kept from one call.
pub const MAX_TITLE_CANDIDATES: usize = 10;

/// Produces candidates of one content kind from a transcript excerpt.
///
/// `api_key` is the requesting user's own service key; `None` uses the
/// server's key.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        kind: ContentKind,
        transcript_excerpt: &str,
        prior_candidate: Option<&str>,
        requirements: Option<&str>,
        api_key: Option<&str>,
    ) -> AiResult<Vec<ContentCandidate>>;
}

#[derive(Debug, Deserialize)]
struct TitlesReply {
    titles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionReply {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChaptersReply {
    chapters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailReply {
    prompt: String,
}

fn instructions(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Title => {
            r#"You write YouTube titles. From the transcript below, write 10 distinct, engaging titles in English, each under 80 characters, varying the style (question, statement, list, how-to).
Return ONLY JSON: {"titles": ["..."]}"#
        }
        ContentKind::Description => {
            r#"You write YouTube video descriptions. From the transcript below, write one description: a hook sentence, a short summary of what viewers will learn, and 3 to 5 relevant hashtags on the last line.
Return ONLY JSON: {"description": "..."}"#
        }
        ContentKind::Timestamps => {
            r#"You write YouTube chapter markers. Transcript lines are prefixed with [MM:SS]. Pick the points where the topic changes and return one line per chapter as "MM:SS Topic". The first chapter starts at 00:00; use the transcript times, never invent them.
Return ONLY JSON: {"chapters": ["00:00 Intro"]}"#
        }
        ContentKind::Thumbnail => {
            r#"You design YouTube thumbnails. From the transcript below, write one prompt for an image model describing a bold, high-contrast 16:9 thumbnail for this video: subject, composition, colours, mood. No text overlays.
Return ONLY JSON: {"prompt": "..."}"#
        }
    }
}

/// Assemble the prompt for one call.
pub(crate) fn build_prompt(
    kind: ContentKind,
    transcript_excerpt: &str,
    prior_candidate: Option<&str>,
    requirements: Option<&str>,
) -> String {
    let mut prompt = String::from(instructions(kind));

    if let Some(prior) = prior_candidate.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str("\n\nPREVIOUS RESULT TO IMPROVE ON:\n");
        prompt.push_str(prior);
    }
    if let Some(req) = requirements.map(str::trim).filter(|r| !r.is_empty()) {
        prompt.push_str("\n\nADDITIONAL USER REQUIREMENTS:\n");
        prompt.push_str(req);
    }

    prompt.push_str("\n\nTRANSCRIPT:\n");
    prompt.push_str(transcript_excerpt);
    prompt
}

fn clean_titles(raw: Vec<String>) -> Vec<ContentCandidate> {
    let mut seen = Vec::new();
    for title in raw {
        let title: String = title.trim().trim_matches('"').trim().chars().take(MAX_TITLE_CHARS - 1).collect();
        if !title.is_empty() && !seen.contains(&title) {
            seen.push(title);
        }
        if seen.len() == MAX_TITLE_CANDIDATES {
            break;
        }
    }
    seen.into_iter().map(ContentCandidate::text).collect()
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(
        &self,
        kind: ContentKind,
        transcript_excerpt: &str,
        prior_candidate: Option<&str>,
        requirements: Option<&str>,
        api_key: Option<&str>,
    ) -> AiResult<Vec<ContentCandidate>> {
        if transcript_excerpt.trim().is_empty() {
            return Err(AiError::invalid_input("Transcript excerpt is empty"));
        }
        let parts = [Part::text(build_prompt(kind, transcript_excerpt, prior_candidate, requirements))];
        let operation = kind.as_str();

        let candidates = match kind {
            ContentKind::Title => {
                let reply: TitlesReply = self.generate_json_with_key(operation, &parts, api_key).await?;
                clean_titles(reply.titles)
            }
            ContentKind::Description => {
                let reply: DescriptionReply = self.generate_json_with_key(operation, &parts, api_key).await?;
                let text = reply.description.trim();
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![ContentCandidate::text(text)]
                }
            }
            ContentKind::Timestamps => {
                let reply: ChaptersReply = self.generate_json_with_key(operation, &parts, api_key).await?;
                let lines = normalize_chapter_lines(&reply.chapters.join("\n"));
                if lines.is_empty() {
                    Vec::new()
                } else {
                    vec![ContentCandidate::text(lines.join("\n"))]
                }
            }
            ContentKind::Thumbnail => {
                let reply: ThumbnailReply = self.generate_json_with_key(operation, &parts, api_key).await?;
                let prompt = reply.prompt.trim();
                if prompt.is_empty() {
                    Vec::new()
                } else {
                    let url = image_url(&self.config().image_base_url, prompt, fresh_seed(prompt));
                    vec![ContentCandidate::image(url, prompt)]
                }
            }
        };

        if candidates.is_empty() {
            return Err(AiError::invalid_response(format!("No usable {} candidates", kind)));
        }
        info!(kind = %kind, candidates = candidates.len(), "Generated content");
        Ok(candidates)
    }
}
