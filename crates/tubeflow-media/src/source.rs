//! Remote source classification (SSRF protection included).
//!
//! A URL is supported when it points at a known video platform (fetched
//! with yt-dlp) or directly at a video file over HTTP(S). Loopback,
//! private, link-local and metadata hosts are always refused unless the
//! policy explicitly allows private sources.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::LazyLock;

use url::{Host, Url};

use crate::error::{MediaError, MediaResult};

/// Maximum URL length accepted.
const MAX_URL_LENGTH: usize = 2048;

/// Platforms handled by yt-dlp.
static PLATFORM_DOMAINS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "youtube.com",
        "youtu.be",
        "vimeo.com",
        "loom.com",
        "wistia.com",
        "dailymotion.com",
        "tiktok.com",
        "twitter.com",
        "x.com",
        "instagram.com",
        "facebook.com",
        "fb.watch",
        "twitch.tv",
        "streamable.com",
    ])
});

/// File extensions fetched with a plain HTTP GET.
const DIRECT_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "mkv", "avi"];

const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata", "metadata.google.internal"];

/// How a supported source is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Platform,
    DirectFile,
}

/// A URL that passed classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub url: Url,
    pub kind: SourceKind,
}

/// Decides which remote URLs may be fetched.
#[derive(Debug, Clone, Default)]
pub struct SourcePolicy {
    allow_private: bool,
}

impl SourcePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept loopback and private network hosts (tests, on-prem mirrors).
    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    /// Classify a URL, failing with `UnsupportedSource` when it cannot be fetched.
    pub fn classify(&self, raw: &str) -> MediaResult<RemoteSource> {
        let raw = raw.trim();
        if raw.len() > MAX_URL_LENGTH {
            return Err(MediaError::unsupported_source(format!(
                "URL exceeds maximum length of {} characters",
                MAX_URL_LENGTH
            )));
        }

        let url = Url::parse(raw).map_err(|e| MediaError::unsupported_source(format!("Invalid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MediaError::unsupported_source(format!(
                "Unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let host = url
            .host()
            .ok_or_else(|| MediaError::unsupported_source("URL has no host"))?;

        if !self.allow_private && is_internal_host(&host) {
            return Err(MediaError::unsupported_source("URL points at an internal address"));
        }

        if let Host::Domain(domain) = &host {
            if is_platform_domain(domain) {
                return Ok(RemoteSource {
                    url,
                    kind: SourceKind::Platform,
                });
            }
        }

        if has_direct_extension(&url) {
            return Ok(RemoteSource {
                url,
                kind: SourceKind::DirectFile,
            });
        }

        Err(MediaError::unsupported_source(format!(
            "Host '{}' is not a supported video source",
            host
        )))
    }
}

fn is_platform_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_lowercase();
    PLATFORM_DOMAINS.iter().any(|allowed| {
        domain == *allowed || domain.strip_suffix(allowed).is_some_and(|prefix| prefix.ends_with('.'))
    })
}

fn has_direct_extension(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(_, ext)| DIRECT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn is_internal_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            BLOCKED_HOSTNAMES.contains(&domain.as_str()) || domain.ends_with(".localhost") || domain.ends_with(".internal")
        }
        Host::Ipv4(ip) => is_internal_ip(&IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_internal_ip(&IpAddr::V6(*ip)),
    }
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
                || v6.to_ipv4_mapped().is_some_and(|v4| is_internal_ip(&IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_urls() {
        let policy = SourcePolicy::new();
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://player.vimeo.com/video/1",
        ] {
            assert_eq!(policy.classify(url).unwrap().kind, SourceKind::Platform, "{}", url);
        }
    }

    #[test]
    fn test_direct_file_urls() {
        let source = SourcePolicy::new()
            .classify("https://cdn.example.com/media/talk.MP4?sig=abc")
            .unwrap();
        assert_eq!(source.kind, SourceKind::DirectFile);
    }

    #[test]
    fn test_rejects_unsupported() {
        let policy = SourcePolicy::new();
        for url in [
            "ftp://youtube.com/video.mp4",
            "https://example.com/page.html",
            "https://notyoutube.com/watch?v=1",
            "not a url",
            "file:///etc/passwd",
        ] {
            assert!(matches!(policy.classify(url), Err(MediaError::UnsupportedSource(_))), "{}", url);
        }
    }

    #[test]
    fn test_rejects_internal_hosts() {
        let policy = SourcePolicy::new();
        for url in [
            "http://127.0.0.1/video.mp4",
            "http://localhost/video.mp4",
            "http://10.0.0.8/video.mp4",
            "http://169.254.169.254/latest/video.mp4",
            "http://[::1]/video.mp4",
            "http://metadata.google.internal/video.mp4",
        ] {
            assert!(policy.classify(url).is_err(), "{}", url);
        }
    }

    #[test]
    fn test_private_sources_can_be_allowed() {
        let policy = SourcePolicy::new().allow_private_networks(true);
        let source = policy.classify("http://127.0.0.1:8080/clip.webm").unwrap();
        assert_eq!(source.kind, SourceKind::DirectFile);
    }

    #[test]
    fn test_rejects_overlong_urls() {
        let url = format!("https://youtube.com/watch?v={}", "a".repeat(MAX_URL_LENGTH));
        assert!(SourcePolicy::new().classify(&url).is_err());
    }
}
