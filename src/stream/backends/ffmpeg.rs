//! ffmpeg download executor
//!
//! Remuxes an HLS stream into MP4 without re-encoding:
//! - request headers (Cookie, Referer, User-Agent) passed through `-headers`
//! - ADTS audio fixed up with `aac_adtstoasc`
//! - output written to `<file>.part` and renamed only on success

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DownloadSettings;
use crate::error::DownloadError;
use crate::stream::backend::{
    DownloadExecutor, DownloadOutcome, DownloadProgress, DownloadRequest, ProgressCallback,
};

const TOOL: &str = "ffmpeg";

/// stderr lines kept for failure diagnostics.
const DIAGNOSTIC_LINES: usize = 8;

/// ffmpeg-based download executor
pub struct FfmpegBackend {
    /// Path to ffmpeg binary
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    /// Create new ffmpeg backend, searching for binary in PATH
    pub fn new() -> Self {
        let ffmpeg_path = which::which(TOOL).unwrap_or_else(|_| PathBuf::from(TOOL));
        Self { ffmpeg_path }
    }

    pub fn from_settings(settings: &DownloadSettings) -> Self {
        match &settings.ffmpeg {
            Some(path) => Self::new().with_ffmpeg_path(path),
            None => Self::new(),
        }
    }

    /// Specify custom ffmpeg binary path
    #[must_use]
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Build ffmpeg command arguments
    fn build_args(&self, request: &DownloadRequest, output_path: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "warning", "-stats"]
            .iter()
            .map(ToString::to_string)
            .collect();

        if !request.headers.is_empty() {
            let header_str = request
                .headers
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\r\n");
            args.push("-headers".to_string());
            args.push(format!("{header_str}\r\n"));
        }

        args.extend(
            [
                // Reconnection for reliability
                "-reconnect", "1",
                "-reconnect_streamed", "1",
                "-reconnect_delay_max", "2",
            ]
            .iter()
            .map(ToString::to_string),
        );

        // Input
        args.push("-i".to_string());
        args.push(request.url.clone());

        // Copy streams without re-encoding
        args.extend(
            ["-c", "copy", "-bsf:a", "aac_adtstoasc"]
                .iter()
                .map(ToString::to_string),
        );

        // The .part suffix hides the container from ffmpeg, so name it
        args.extend(["-f", "mp4", "-y"].iter().map(ToString::to_string));
        args.push(output_path.to_string_lossy().into_owned());

        args
    }

    /// Parse progress from an ffmpeg stats line
    fn parse_progress(line: &str) -> Option<FfmpegProgress> {
        // ffmpeg progress format: "frame=  123 fps= 30 ... time=00:01:23.45 bitrate=1234.5kbits/s speed=1.5x"
        if !line.contains("time=") {
            return None;
        }

        let time = line.split("time=").nth(1)?.split_whitespace().next()?;

        // Parse time (HH:MM:SS.ms)
        let parts: Vec<&str> = time.split(':').collect();
        if parts.len() != 3 {
            return None;
        }

        let hours: f64 = parts[0].parse().ok()?;
        let minutes: f64 = parts[1].parse().ok()?;
        let seconds: f64 = parts[2].parse().ok()?;
        let total_seconds = hours * 3600.0 + minutes * 60.0 + seconds;

        let speed = line
            .split("speed=")
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.trim_end_matches('x').parse().ok());

        Some(FfmpegProgress {
            time_seconds: total_seconds,
            speed,
        })
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// `<file>.part` next to the final output.
fn part_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

/// Feed `reader` to `f` one line at a time, splitting on `\r` as well as
/// `\n` since ffmpeg rewrites its stats line in place.
async fn for_each_line<R, F>(mut reader: R, mut f: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut buffer = [0u8; 8 * 1024];
    let mut pending = Vec::new();

    while let Ok(n) = reader.read(&mut buffer).await {
        if n == 0 {
            break;
        }
        for &byte in &buffer[..n] {
            if byte == b'\r' || byte == b'\n' {
                if !pending.is_empty() {
                    f(String::from_utf8_lossy(&pending).trim());
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        f(String::from_utf8_lossy(&pending).trim());
    }
}

#[async_trait]
impl DownloadExecutor for FfmpegBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    /// Check if ffmpeg is available
    async fn check_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DownloadError::Io { path, source }
        };

        if let Some(parent) = request.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        let part = part_path(&request.output);
        let args = self.build_args(request, &part);
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DownloadError::Spawn {
                tool: TOOL.to_string(),
                source,
            })?;

        let start_time = Instant::now();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);

        if let Some(stderr) = child.stderr.take() {
            for_each_line(stderr, |line| {
                if let Some(prog) = Self::parse_progress(line) {
                    if let Some(ref cb) = progress {
                        cb(DownloadProgress {
                            media_seconds: prog.time_seconds,
                            speed: prog.speed,
                            elapsed_seconds: start_time.elapsed().as_secs_f64(),
                        });
                    }
                    return;
                }
                debug!("ffmpeg: {}", line);
                if tail.len() == DIAGNOSTIC_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            })
            .await;
        }

        let status = child.wait().await.map_err(|source| DownloadError::Spawn {
            tool: TOOL.to_string(),
            source,
        })?;

        if !status.success() {
            if let Err(e) = tokio::fs::remove_file(&part).await {
                debug!("no partial file to remove at {}: {e}", part.display());
            }
            let diagnostic = if tail.is_empty() {
                "no output".to_string()
            } else {
                tail.into_iter().collect::<Vec<_>>().join(" | ")
            };
            warn!(%status, "ffmpeg failed: {diagnostic}");
            return Err(DownloadError::Failed {
                tool: TOOL.to_string(),
                status: status.to_string(),
                diagnostic,
            });
        }

        tokio::fs::rename(&part, &request.output)
            .await
            .map_err(io_err(&request.output))?;
        let bytes = tokio::fs::metadata(&request.output)
            .await
            .map_err(io_err(&request.output))?
            .len();

        info!("Saved {} ({} bytes) via ffmpeg", request.output.display(), bytes);
        Ok(DownloadOutcome {
            path: request.output.clone(),
            bytes,
            elapsed: start_time.elapsed(),
        })
    }
}

#[derive(Debug, Clone)]
struct FfmpegProgress {
    time_seconds: f64,
    speed: Option<f64>,
}
