//! Thumbnail image references.
//!
//! A thumbnail candidate is a URL on an image-rendering service that draws
//! the prompt on request. Nothing is rendered or stored here.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;

/// Seeds stay within the range the image service accepts.
const SEED_RANGE: u64 = 100_000_000;

/// Build the image URL for `prompt`.
pub fn image_url(base_url: &str, prompt: &str, seed: u64) -> String {
    format!(
        "{}/prompt/{}?model=flux&seed={}&width={}&height={}&nologo=true&private=true&safe=false&enhance=true",
        base_url.trim_end_matches('/'),
        urlencoding::encode(prompt.trim()),
        seed % SEED_RANGE,
        THUMBNAIL_WIDTH,
        THUMBNAIL_HEIGHT
    )
}

/// A fresh seed per call, so regenerating the same prompt yields a new image.
pub fn fresh_seed(prompt: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish() % SEED_RANGE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url_encodes_prompt() {
        let url = image_url("https://image.pollinations.ai/", "Rust crab & gears", 42);
        assert!(url.starts_with("https://image.pollinations.ai/prompt/Rust%20crab%20%26%20gears?"));
        assert!(url.contains("width=1280&height=720"));
        assert!(url.contains("nologo=true&private=true"));
        assert!(url.contains("seed=42"));
    }

    #[test]
    fn test_seed_is_bounded() {
        assert!(fresh_seed("anything") < SEED_RANGE);
        assert!(image_url("https://img", "p", u64::MAX).contains(&format!("seed={}", u64::MAX % SEED_RANGE)));
    }
}
