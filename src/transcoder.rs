//! Subprocess-driven media pipeline: download, probe, transcode,
//! thumbnail. Shells out to `ffmpeg`/`ffprobe`, with every stage capped
//! by a `tokio::time::timeout`. Temp files are named `<content_id>_*`
//! and cleaned up on every exit path via `TempFileGuard`, an RAII guard
//! that fires cleanup on drop unless explicitly released with `.keep()`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{IngestionError, Result};

#[derive(Debug, Clone)]
pub struct MediaCaps {
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
    pub max_clip_duration: Duration,
    pub max_download_bytes: u64,
}

impl Default for MediaCaps {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(120),
            transcode_timeout: Duration::from_secs(180),
            max_clip_duration: Duration::from_secs(300),
            max_download_bytes: 500 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    pub duration_seconds: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Removes the temp file it wraps when dropped, regardless of which exit
/// path (success, error, or cancellation) was taken.
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands the caller ownership of the file without deleting it.
    pub fn keep(self) -> PathBuf {
        let path = self.path.clone();
        std::mem::forget(self);
        path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let path = self.path.clone();
        tokio::spawn(async move {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to clean up temp file");
                }
            }
        });
    }
}

/// A specialized downloader for a known video platform, substitutable
/// for a real binary (e.g. yt-dlp) behind plain streamed HTTP GET.
#[async_trait]
pub trait PlatformDownloader: Send + Sync {
    fn handles(&self, url: &str) -> bool;
    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<()>;
}

pub struct Transcoder {
    temp_dir: PathBuf,
    http: reqwest::Client,
    platform_downloaders: Vec<Box<dyn PlatformDownloader>>,
}

impl Transcoder {
    pub fn new(temp_dir: PathBuf, http: reqwest::Client) -> Self {
        Self { temp_dir, http, platform_downloaders: Vec::new() }
    }

    pub fn with_platform_downloader(mut self, downloader: Box<dyn PlatformDownloader>) -> Self {
        self.platform_downloaders.push(downloader);
        self
    }

    pub fn temp_path(&self, content_id: &str, suffix: &str) -> PathBuf {
        self.temp_dir.join(format!("{content_id}_{suffix}"))
    }

    #[instrument(skip(self))]
    pub async fn download(&self, content_id: &str, url: &str, caps: &MediaCaps) -> Result<TempFileGuard> {
        let dest = self.temp_path(content_id, "source");

        if let Some(downloader) = self.platform_downloaders.iter().find(|d| d.handles(url)) {
            tokio::time::timeout(caps.download_timeout, downloader.download(url, &dest, caps.download_timeout))
                .await
                .map_err(|_| IngestionError::UpstreamUnavailable("platform download timed out".to_string()))??;
            return Ok(TempFileGuard::new(dest));
        }

        tokio::time::timeout(caps.download_timeout, self.stream_download(url, &dest, caps.max_download_bytes))
            .await
            .map_err(|_| IngestionError::UpstreamUnavailable("download timed out".to_string()))??;

        Ok(TempFileGuard::new(dest))
    }

    async fn stream_download(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<()> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(IngestionError::UpstreamRejected {
                status: response.status().as_u16(),
                message: "media download rejected".to_string(),
            });
        }

        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut total_bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            total_bytes += chunk.len() as u64;
            if total_bytes > max_bytes {
                drop(file);
                let _ = fs::remove_file(dest).await;
                return Err(IngestionError::ResourceExhausted(format!(
                    "download exceeded max_download_bytes cap of {max_bytes} bytes"
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let output = Command::new("ffprobe")
            .args([
                "-v", "error",
                "-show_entries", "format=duration",
                "-show_entries", "stream=codec_type",
                "-of", "json",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| IngestionError::InternalError(format!("ffprobe spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(IngestionError::InvalidData("ffprobe failed on input file".to_string()));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let duration_seconds = parsed["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok());
        let streams = parsed["streams"].as_array().cloned().unwrap_or_default();
        let has_video = streams.iter().any(|s| s["codec_type"] == "video");
        let has_audio = streams.iter().any(|s| s["codec_type"] == "audio");

        debug!(?duration_seconds, has_video, has_audio, "probed media file");
        Ok(MediaProbe { duration_seconds, has_video, has_audio })
    }

    #[instrument(skip(self))]
    pub async fn transcode(&self, content_id: &str, input: &Path, caps: &MediaCaps) -> Result<TempFileGuard> {
        let output = self.temp_path(content_id, "processed.mp4");
        let clip_seconds = caps.max_clip_duration.as_secs().to_string();

        let run = Command::new("ffmpeg")
            .args(["-y", "-i"])
            .arg(input)
            .args(["-t", &clip_seconds, "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-movflags", "+faststart"])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let status = tokio::time::timeout(caps.transcode_timeout, run)
            .await
            .map_err(|_| IngestionError::InternalError("transcode timed out".to_string()))?
            .map_err(|e| IngestionError::InternalError(format!("ffmpeg spawn failed: {e}")))?;

        if !status.success() {
            return Err(IngestionError::InvalidData("ffmpeg transcode failed".to_string()));
        }

        Ok(TempFileGuard::new(output))
    }

    /// Muxes an audio-only input with a still placeholder frame so the
    /// artifact still satisfies a video-consumer contract.
    #[instrument(skip(self))]
    pub async fn transcode_audio_with_placeholder(&self, content_id: &str, input: &Path, caps: &MediaCaps) -> Result<TempFileGuard> {
        let output = self.temp_path(content_id, "processed.mp4");
        let clip_seconds = caps.max_clip_duration.as_secs().to_string();

        let run = Command::new("ffmpeg")
            .args(["-y", "-f", "lavfi", "-i", "color=c=black:s=640x360:r=1", "-i"])
            .arg(input)
            .args([
                "-shortest", "-t", &clip_seconds,
                "-c:v", "libx264", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-movflags", "+faststart",
            ])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let status = tokio::time::timeout(caps.transcode_timeout, run)
            .await
            .map_err(|_| IngestionError::InternalError("transcode timed out".to_string()))?
            .map_err(|e| IngestionError::InternalError(format!("ffmpeg spawn failed: {e}")))?;

        if !status.success() {
            return Err(IngestionError::InvalidData("ffmpeg placeholder mux failed".to_string()));
        }

        Ok(TempFileGuard::new(output))
    }

    /// Extracts the audio track of a video container to a standalone
    /// file, for transcription inputs that must not include video.
    #[instrument(skip(self))]
    pub async fn extract_audio(&self, content_id: &str, input: &Path, caps: &MediaCaps) -> Result<TempFileGuard> {
        let output = self.temp_path(content_id, "audio.m4a");

        let run = Command::new("ffmpeg")
            .args(["-y", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", "aac"])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let status = tokio::time::timeout(caps.transcode_timeout, run)
            .await
            .map_err(|_| IngestionError::InternalError("audio extraction timed out".to_string()))?
            .map_err(|e| IngestionError::InternalError(format!("ffmpeg spawn failed: {e}")))?;

        if !status.success() {
            return Err(IngestionError::InvalidData("ffmpeg audio extraction failed".to_string()));
        }

        Ok(TempFileGuard::new(output))
    }

    #[instrument(skip(self))]
    pub async fn thumbnail(&self, content_id: &str, input: &Path, at_secs: f64) -> Result<TempFileGuard> {
        let output = self.temp_path(content_id, "thumbnail.jpg");

        let status = Command::new("ffmpeg")
            .args(["-y", "-ss", &at_secs.to_string(), "-i"])
            .arg(input)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| IngestionError::InternalError(format!("ffmpeg spawn failed: {e}")))?;

        if !status.success() {
            return Err(IngestionError::InvalidData("ffmpeg thumbnail extraction failed".to_string()));
        }

        Ok(TempFileGuard::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_caps_default_matches_resource_model() {
        let caps = MediaCaps::default();
        assert_eq!(caps.download_timeout, Duration::from_secs(120));
        assert_eq!(caps.transcode_timeout, Duration::from_secs(180));
        assert_eq!(caps.max_clip_duration, Duration::from_secs(300));
        assert_eq!(caps.max_download_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn temp_path_is_namespaced_by_content_id() {
        let transcoder = Transcoder::new(PathBuf::from("/tmp"), reqwest::Client::new());
        let path = transcoder.temp_path("abc123", "source");
        assert_eq!(path, PathBuf::from("/tmp/abc123_source"));
    }
}
