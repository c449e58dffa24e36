//! Input validation and sanitization.
//!
//! Remote URL safety (SSRF) is decided by the media crate's `SourcePolicy`
//! when a video is registered; this module only guards identifiers and free
//! text coming in over HTTP.

/// Maximum length of free-text generation requirements.
pub const MAX_REQUIREMENTS_LENGTH: usize = 5000;

/// Maximum length of a prior candidate echoed back for refinement.
pub const MAX_PRIOR_CANDIDATE_LENGTH: usize = 10_000;

/// Maximum length of an uploaded file's reported name.
const MAX_FILE_NAME_LENGTH: usize = 255;

/// Drop control characters (newline and tab excepted) and cap the length.
pub fn sanitize_string(input: &str, max_chars: usize) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(max_chars)
        .collect()
}

/// Validate video ID format.
///
/// Valid format: alphanumeric characters and hyphens only, 8-64 chars.
pub fn is_valid_video_id(id: &str) -> bool {
    if id.len() > 64 || id.len() < 8 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Reduce a client-supplied file name to its final path component, with only
/// safe characters kept.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .take(MAX_FILE_NAME_LENGTH)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_validation() {
        assert!(is_valid_video_id("12345678"));
        assert!(is_valid_video_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_video_id("short"));
        assert!(!is_valid_video_id("has/slash/in/it"));
        assert!(!is_valid_video_id("has..dots.."));
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("  keep\nlines\u{0007}  ", 100), "keep\nlines");
        assert_eq!(sanitize_string("abcdef", 3), "abc");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\My Talk.MOV"), "My Talk.MOV");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name("///"), "upload");
    }
}
