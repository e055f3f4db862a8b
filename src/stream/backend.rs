//! Download executor trait.
//!
//! A [`DownloadExecutor`] takes a resolved HLS target and writes the media
//! to a file. The production implementation is
//! [`FfmpegBackend`](super::backends::FfmpegBackend); tests substitute an
//! in-memory fake.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DownloadError;

/// One download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Manifest URL.
    pub url: String,
    /// Final file path. Executors write elsewhere first and move into place.
    pub output: PathBuf,
    /// Extra HTTP headers for manifest and segment requests.
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.headers.push((name.to_string(), value.to_string()));
        }
        self
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// Size of the file on disk.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Callback invoked periodically with download progress.
pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Snapshot of download progress at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Media time written so far, in seconds.
    pub media_seconds: f64,
    /// Throughput relative to real time, when reported.
    pub speed: Option<f64>,
    /// Wall-clock seconds since the download started.
    pub elapsed_seconds: f64,
}

/// Trait for download executors.
#[async_trait]
pub trait DownloadExecutor: Send + Sync {
    /// Short tool name used in messages (e.g. `"ffmpeg"`).
    fn name(&self) -> &'static str;

    /// Returns `true` if the underlying tool can be run.
    async fn check_available(&self) -> bool;

    /// Run one download to completion.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome, DownloadError>;
}
