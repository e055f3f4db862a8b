//! Stream resolution and download for thuis
//!
//! The resolver turns an episode page into a [`ResolvedStream`]; a
//! [`DownloadExecutor`] (ffmpeg) writes it to disk.

pub mod backend;
pub mod backends;
pub mod metadata;
pub mod resolver;

pub use backend::{DownloadExecutor, DownloadOutcome, DownloadProgress, DownloadRequest, ProgressCallback};
pub use metadata::{ResolvedStream, StreamKind, StreamMetadata, StreamTarget};
pub use resolver::StreamResolver;
