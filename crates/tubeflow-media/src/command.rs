//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before -i
    input_args: Vec<String>,
    /// Arguments placed after -i
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Remux/transcode into the canonical delivery format: H.264 + AAC in an
    /// MP4 container with the index at the front.
    pub fn normalize(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::new(input, output)
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .audio_bitrate("128k")
            .output_args(["-movflags", "+faststart"])
    }

    /// Extract a mono speech-friendly MP3 track.
    pub fn extract_audio(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::new(input, output)
            .output_args(["-vn", "-map", "a:0", "-ac", "1", "-ar", "16000"])
            .audio_codec("libmp3lame")
            .output_args(["-q:a", "4"])
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.extend(["-v".to_string(), self.log_level.clone()]);
        // Progress key=value pairs go to stderr alongside errors
        args.extend(["-progress".to_string(), "pipe:2".to_string(), "-nostats".to_string()]);
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Progress reported through `-progress pipe:2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_ms` encoded so far.
    pub fn percentage(&self, total_ms: i64) -> f64 {
        if total_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_ms as f64) * 100.0).clamp(0.0, 100.0)
    }
}

/// Runner for FFmpeg commands with a hard timeout.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: String,
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout: None,
        }
    }

    /// Use a specific binary instead of `ffmpeg` from PATH.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command, reporting progress blocks as they complete.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, on_progress: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        which::which(&self.program).map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut current = FfmpegProgress::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress_line(&line, &mut current) {
                    ProgressLine::Block(progress) => on_progress(progress),
                    ProgressLine::Field => {}
                    ProgressLine::Other => {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = self.wait_for_completion(&mut child).await;
        let stderr_tail = reader.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail).filter(|s| !s.is_empty()),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!("FFmpeg timed out after {:?}, killing process", timeout);
                let _ = child.kill().await;
                Err(MediaError::Timeout(timeout.as_secs()))
            }
        }
    }
}

enum ProgressLine {
    /// A `progress=` line closed a block
    Block(FfmpegProgress),
    /// A progress key we folded into the current block
    Field,
    /// Anything else, usually diagnostics
    Other,
}

fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> ProgressLine {
    let Some((key, value)) = line.trim().split_once('=') else {
        return ProgressLine::Other;
    };

    match key {
        "out_time_us" | "out_time_ms" => {
            // Both keys are microseconds in practice.
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return ProgressLine::Block(current.clone());
        }
        "frame" | "fps" | "bitrate" | "total_size" | "out_time" | "dup_frames" | "drop_frames" => {}
        _ if key.starts_with("stream_") => {}
        _ => return ProgressLine::Other,
    }
    ProgressLine::Field
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_args() {
        let args = FfmpegCommand::normalize("in.mov", "out.mp4").build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i in.mov"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-movflags +faststart"));
    }

    #[test]
    fn test_extract_audio_args() {
        let joined = FfmpegCommand::extract_audio("in.mp4", "audio.mp3").build_args().join(" ");
        assert!(joined.contains("-vn -map a:0 -ac 1 -ar 16000"));
        assert!(joined.contains("-c:a libmp3lame"));
    }

    #[test]
    fn test_progress_parsing() {
        let mut current = FfmpegProgress::default();

        assert!(matches!(parse_progress_line("out_time_us=5000000", &mut current), ProgressLine::Field));
        assert_eq!(current.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut current);
        assert!((current.speed - 1.5).abs() < 0.01);

        match parse_progress_line("progress=end", &mut current) {
            ProgressLine::Block(p) => assert!(p.is_complete),
            _ => panic!("expected a progress block"),
        }

        assert!(matches!(
            parse_progress_line("[mov,mp4] moov atom not found", &mut current),
            ProgressLine::Other
        ));
    }

    #[test]
    fn test_progress_percentage_is_clamped() {
        let progress = FfmpegProgress {
            out_time_ms: 15_000,
            ..Default::default()
        };
        assert!((progress.percentage(10_000) - 100.0).abs() < f64::EPSILON);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let runner = FfmpegRunner::new().with_program("definitely-not-ffmpeg-binary");
        let err = runner
            .run(&FfmpegCommand::normalize("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound));
    }
}
