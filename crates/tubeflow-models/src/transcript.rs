//! Timestamped transcript segments and clock formatting.
//!
//! Clock strings accepted here are `HH:MM:SS`, `MM:SS` or plain seconds,
//! optionally with a fractional part.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One transcribed span of speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("empty clock value")]
    Empty,

    #[error("invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid clock format: {0}")]
    InvalidFormat(String),
}

/// Parse a clock string into milliseconds.
pub fn parse_clock(value: &str) -> Result<u64, ClockError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClockError::Empty);
    }

    let parts: Vec<&str> = value.split(':').collect();
    let field = |name: &'static str, raw: &str| -> Result<f64, ClockError> {
        let parsed: f64 = raw
            .trim()
            .parse()
            .map_err(|_| ClockError::InvalidValue(name, raw.to_string()))?;
        if parsed < 0.0 || !parsed.is_finite() {
            return Err(ClockError::InvalidValue(name, raw.to_string()));
        }
        Ok(parsed)
    };

    let seconds = match parts.as_slice() {
        [s] => field("seconds", s)?,
        [m, s] => field("minutes", m)? * 60.0 + field("seconds", s)?,
        [h, m, s] => field("hours", h)? * 3600.0 + field("minutes", m)? * 60.0 + field("seconds", s)?,
        _ => return Err(ClockError::InvalidFormat(value.to_string())),
    };

    Ok((seconds * 1000.0).round() as u64)
}

/// Format milliseconds as `MM:SS`, or `HH:MM:SS` past the hour.
pub fn format_clock(ms: u64) -> String {
    let total = ms / 1000;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Render segments as `[MM:SS] text` lines, stopping before `max_chars`.
pub fn render_excerpt(segments: &[TranscriptSegment], max_chars: usize) -> String {
    let mut out = String::new();
    for segment in segments {
        let line = format!("[{}] {}\n", format_clock(segment.start_ms), segment.text.trim());
        if out.len() + line.len() > max_chars {
            break;
        }
        out.push_str(&line);
    }
    out
}

/// Normalize chapter lines of the form `MM:SS Topic`.
///
/// Seconds of 60 or more carry into minutes, lines without a leading clock
/// are dropped, the result is sorted and always starts at `00:00`.
pub fn normalize_chapter_lines(raw: &str) -> Vec<String> {
    let mut chapters: Vec<(u64, String)> = raw
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
            let (clock, title) = line.split_once(char::is_whitespace)?;
            let ms = parse_clock(clock.trim_end_matches([':', '-'])).ok()?;
            let title = title.trim().trim_start_matches(['-', ':']).trim();
            if title.is_empty() {
                return None;
            }
            Some((ms, title.to_string()))
        })
        .collect();

    chapters.sort_by_key(|(ms, _)| *ms);
    chapters.dedup_by_key(|(ms, _)| *ms / 1000);

    if let Some(first) = chapters.first_mut() {
        first.0 = 0;
    }

    chapters
        .into_iter()
        .map(|(ms, title)| format!("{} {}", format_clock(ms), title))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_formats() {
        assert_eq!(parse_clock("01:30:00").unwrap(), 5_400_000);
        assert_eq!(parse_clock("05:30").unwrap(), 330_000);
        assert_eq!(parse_clock("90").unwrap(), 90_000);
        assert_eq!(parse_clock("00:01.5").unwrap(), 1_500);
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert_eq!(parse_clock(""), Err(ClockError::Empty));
        assert!(parse_clock("1:2:3:4").is_err());
        assert!(parse_clock("ab:10").is_err());
        assert!(parse_clock("-5").is_err());
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(61_999), "01:01");
        assert_eq!(format_clock(3_723_000), "01:02:03");
    }

    #[test]
    fn test_render_excerpt_truncates_on_line_boundary() {
        let segments = vec![
            TranscriptSegment::new(0, 2_000, "Welcome back"),
            TranscriptSegment::new(2_000, 65_000, "Today we cover ownership"),
        ];
        let full = render_excerpt(&segments, 1_000);
        assert_eq!(full, "[00:00] Welcome back\n[00:02] Today we cover ownership\n");

        let short = render_excerpt(&segments, 25);
        assert_eq!(short, "[00:00] Welcome back\n");
    }

    #[test]
    fn test_normalize_chapter_lines() {
        let raw = "00:05 Intro\n- 01:75 Borrowing\nnot a chapter\n03:10 Lifetimes\n";
        let lines = normalize_chapter_lines(raw);
        assert_eq!(lines, vec!["00:00 Intro", "02:15 Borrowing", "03:10 Lifetimes"]);
    }
}
