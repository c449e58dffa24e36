//! Remote source download with hard size and time caps.
//!
//! Downloads land in a private scratch directory next to the destination and
//! are only moved into place once complete, so an aborted fetch (cap hit,
//! timeout, tool failure) leaves nothing behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::move_file;
use crate::source::{RemoteSource, SourceKind, SourcePolicy};

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Fetches remote sources over HTTP or through yt-dlp.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    config: MediaConfig,
    http: reqwest::Client,
}

/// Redirect hops followed before a direct download gives up.
const MAX_REDIRECTS: usize = 5;

impl RemoteFetcher {
    /// Every redirect hop is classified again, so a public URL cannot bounce
    /// the download onto an internal address.
    pub fn new(config: MediaConfig) -> MediaResult<Self> {
        let policy = SourcePolicy::new().allow_private_networks(config.allow_private_sources);
        let redirects = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
            }
            let verdict = policy.classify(attempt.url().as_str());
            match verdict {
                Ok(_) => attempt.follow(),
                Err(e) => {
                    let reason = format!("redirect to {} refused: {}", attempt.url(), e);
                    attempt.error(reason)
                }
            }
        });
        let http = reqwest::Client::builder().redirect(redirects).build()?;
        Ok(Self { config, http })
    }

    /// Download `source` into `dest_dir` as `{file_stem}.{ext}`.
    pub async fn fetch(&self, source: &RemoteSource, dest_dir: &Path, file_stem: &str) -> MediaResult<FetchedMedia> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let scratch = tempfile::Builder::new().prefix(".fetch-").tempdir_in(dest_dir)?;
        let limit = self.config.max_download_time;

        let download = async {
            match source.kind {
                SourceKind::DirectFile => self.fetch_direct(source, scratch.path()).await,
                SourceKind::Platform => self.fetch_platform(source, scratch.path()).await,
            }
        };

        let downloaded = match tokio::time::timeout(limit, download).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url = %source.url, "Download exceeded {:?}, aborting", limit);
                return Err(MediaError::DownloadTimeout(limit.as_secs()));
            }
        };

        let ext = downloaded
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();
        let final_path = dest_dir.join(format!("{}.{}", file_stem, ext));
        move_file(&downloaded, &final_path).await?;
        let size_bytes = tokio::fs::metadata(&final_path).await?.len();

        info!(
            url = %source.url,
            output = %final_path.display(),
            size_mb = size_bytes as f64 / (1024.0 * 1024.0),
            "Downloaded remote source"
        );

        Ok(FetchedMedia {
            path: final_path,
            size_bytes,
        })
    }

    async fn fetch_direct(&self, source: &RemoteSource, scratch: &Path) -> MediaResult<PathBuf> {
        let max = self.config.max_download_bytes;
        let response = self.http.get(source.url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(MediaError::download_failed(format!(
                "HTTP {} from {}",
                response.status(),
                source.url
            )));
        }
        if response.content_length().is_some_and(|len| len > max) {
            return Err(MediaError::SourceTooLarge { limit_bytes: max });
        }

        let ext = source
            .url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_else(|| "mp4".to_string());
        let path = scratch.join(format!("source.{}", ext));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            // Servers can lie about or omit Content-Length.
            if received > max {
                return Err(MediaError::SourceTooLarge { limit_bytes: max });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if received == 0 {
            return Err(MediaError::download_failed("Remote source is empty"));
        }
        Ok(path)
    }

    async fn fetch_platform(&self, source: &RemoteSource, scratch: &Path) -> MediaResult<PathBuf> {
        let program = match &self.config.ytdlp_path {
            Some(path) => PathBuf::from(path),
            None => which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?,
        };
        let max = self.config.max_download_bytes;
        let template = scratch.join("source.%(ext)s");

        let args = ytdlp_args(&template, max, source.url.as_str());
        debug!("Running yt-dlp: {}", args.join(" "));

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let last = stderr.lines().last().unwrap_or("Unknown error");
            return Err(MediaError::download_failed(format!("yt-dlp failed: {}", last)));
        }

        let downloaded = find_single_file(scratch).await?;
        let Some(path) = downloaded else {
            // yt-dlp exits 0 when it skips a file over --max-filesize.
            if stdout.contains("max-filesize") || stderr.contains("max-filesize") {
                return Err(MediaError::SourceTooLarge { limit_bytes: max });
            }
            return Err(MediaError::download_failed("yt-dlp produced no output file"));
        };

        if tokio::fs::metadata(&path).await?.len() > max {
            return Err(MediaError::SourceTooLarge { limit_bytes: max });
        }
        Ok(path)
    }
}

fn ytdlp_args(template: &Path, max_bytes: u64, url: &str) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-progress".to_string(),
        "-f".to_string(),
        "bv*+ba/b".to_string(),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "--max-filesize".to_string(),
        max_bytes.to_string(),
        "-o".to_string(),
        template.to_string_lossy().to_string(),
        url.to_string(),
    ]
}

async fn find_single_file(dir: &Path) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type().await?.is_file() && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
