//! Errors raised along the resolve-and-download pipeline.
//!
//! Only [`AuthError`] aborts a batch. [`ResolutionError`] and
//! [`DownloadError`] are fatal to a single episode and surface through
//! [`EpisodeError`] in the batch report.

use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;

/// Login or session probing failed.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("login rejected: still on the login page ({url})")]
    Rejected { url: String },

    #[error("login required but no credentials configured (run `thuis --setup` or set VRT_USERNAME and VRT_PASSWORD)")]
    MissingCredentials,

    #[error("browser error during login: {0}")]
    Browser(#[from] BrowserError),
}

/// A stream URL could not be obtained for an episode.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("no stream metadata redirect observed for {episode_url}")]
    NoRedirect { episode_url: String },

    #[error("invalid redirect location {location:?}: {source}")]
    InvalidLocation {
        location: String,
        source: url::ParseError,
    },

    #[error("metadata API returned HTTP {status} for {url}")]
    ApiStatus { status: u16, url: String },

    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed stream metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("no playable target for {title:?}")]
    NoPlayableTarget { title: String },

    #[error("browser error during resolution: {0}")]
    Browser(#[from] BrowserError),
}

/// The external download tool failed.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{tool} is not installed or not runnable")]
    Unavailable { tool: String },

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {diagnostic}")]
    Failed {
        tool: String,
        status: String,
        /// Last lines of the tool's stderr.
        diagnostic: String,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a single episode did not end up on disk.
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("{title:?} is DRM-protected ({drm}); only a DASH target is offered")]
    Protected { title: String, drm: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Failures that abort a whole run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("could not load season page {url}: {source}")]
    Discovery { url: String, source: BrowserError },

    #[error("could not read local inventory {path}: {source}")]
    Inventory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}
