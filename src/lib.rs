//! `thuis` - authenticated VRT MAX episode and season downloader
//!
//! # Features
//!
//! - **URL taxonomy**: episode, season and trailer URLs mapped to stable file names
//! - **Sessions**: login cookies persisted and re-used until a probe says otherwise
//! - **Stream resolution**: token grant, metadata redirect and HLS target selection
//!   driven through a headless Chromium over the DevTools protocol
//! - **Batch downloads**: season discovery, skip-existing and resume-from filtering,
//!   paced per-episode execution that survives individual failures
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use thuis::browser::{Browser, ChromeBrowser, ChromeOptions};
//! use thuis::stream::backends::FfmpegBackend;
//! use thuis::{ApiClient, Orchestrator, RunOptions, Settings};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let fetcher = Arc::new(ApiClient::from_settings(&settings)?);
//!     let executor = Arc::new(FfmpegBackend::from_settings(&settings.download));
//!     let browser = ChromeBrowser::launch(ChromeOptions::from_settings(&settings)).await?;
//!
//!     let orchestrator = Orchestrator::new(settings, fetcher, executor);
//!     let result = orchestrator
//!         .run(&browser, "https://www.vrt.be/vrtmax/a-z/thuis/31/", None, &RunOptions::default())
//!         .await?;
//!     browser.close().await?;
//!
//!     println!("{} downloaded, {} failed", result.succeeded, result.failed);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod batch;
pub mod browser;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod http_client;
pub mod inventory;
pub mod session;
pub mod stream;
pub mod taxonomy;

pub use auth::Authenticator;
pub use batch::{plan_downloads, BatchEvent, BatchPlan, BatchResult, Orchestrator, RunOptions};
pub use browser::{Browser, BrowserError, BrowserPage, ChromeBrowser, ChromeOptions};
pub use config::Settings;
pub use credentials::Credentials;
pub use error::{AuthError, BatchError, DownloadError, EpisodeError, ResolutionError};
pub use http_client::{ApiClient, MetadataFetcher};
pub use session::{Cookie, Session, SessionStore};
pub use stream::{DownloadExecutor, ResolvedStream, StreamResolver};
pub use taxonomy::{classify, filename, parse, EpisodeIdentity, UrlKind};

/// Version of thuis
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
