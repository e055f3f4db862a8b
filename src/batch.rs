//! Batch orchestration.
//!
//! ```text
//! Init -> Authenticate -> Discover -> BuildPlan -> Empty: Done
//!                                              -> NonEmpty: ExecuteLoop -> Done
//! ```
//!
//! Episodes run strictly in plan order, one page each. A failing episode is
//! recorded and the loop moves on; only authentication aborts a run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::auth::Authenticator;
use crate::browser::{close_page, Browser, BrowserPage};
use crate::config::{Settings, Timing};
use crate::credentials::Credentials;
use crate::discovery;
use crate::error::{BatchError, EpisodeError};
use crate::http_client::MetadataFetcher;
use crate::inventory;
use crate::session::{cookie_header, SessionStore};
use crate::stream::{
    DownloadExecutor, DownloadOutcome, DownloadProgress, DownloadRequest, ProgressCallback,
    StreamKind, StreamResolver,
};
use crate::taxonomy::{self, UrlKind, MEDIA_EXTENSION};

/// One episode scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEpisode {
    pub url: String,
    pub file_name: String,
    pub output: PathBuf,
}

/// The ordered work list of a run. Fixed once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    items: Vec<PlannedEpisode>,
}

impl BatchPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PlannedEpisode] {
        &self.items
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.file_name.as_str()).collect()
    }
}

/// Build a plan from `(episode URL, file name)` candidates.
///
/// `force` ignores `existing`; the start cutoff applies either way. A file
/// name claimed by an earlier candidate is not planned twice.
pub fn plan_downloads(
    candidates: &[(String, String)],
    existing: &HashSet<String>,
    start_episode: Option<u32>,
    force: bool,
    dir: &Path,
) -> BatchPlan {
    let all: Vec<String> = candidates.iter().map(|(_, name)| name.clone()).collect();
    let nothing = HashSet::new();
    let existing = if force { &nothing } else { existing };
    let wanted: HashSet<String> = discovery::filter(&all, existing, start_episode)
        .into_iter()
        .collect();

    let mut seen = HashSet::new();
    let items = candidates
        .iter()
        .filter(|(_, name)| wanted.contains(name) && seen.insert(name.clone()))
        .map(|(url, name)| PlannedEpisode {
            url: url.clone(),
            file_name: name.clone(),
            output: dir.join(name),
        })
        .collect();

    BatchPlan { items }
}

/// Counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `(file name, reason)` per failed episode.
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    /// A run succeeds only when at least one episode was downloaded.
    pub fn is_success(&self) -> bool {
        self.succeeded > 0
    }
}

/// Progress notifications for the user-facing narrative.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Authenticated,
    Discovered { found: usize },
    Planned { total: usize, skipped: usize },
    Started { index: usize, total: usize, file_name: String },
    Resolved { title: String, kind: StreamKind },
    Progress { file_name: String, progress: DownloadProgress },
    Succeeded { file_name: String, bytes: u64, elapsed: Duration },
    Failed { file_name: String, reason: String },
    Pausing { delay: Duration },
}

pub type EventSink = Arc<dyn Fn(&BatchEvent) + Send + Sync>;

/// Randomized delay between episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_timing(timing: &Timing) -> Self {
        Self::new(
            Duration::from_millis(timing.pace_min_ms),
            Duration::from_millis(timing.pace_max_ms),
        )
    }

    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let low = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let high = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

/// Per-run options from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub start_episode: Option<u32>,
    pub force: bool,
    /// A `.mp4` path names the file of a single download; anything else is
    /// the output directory.
    pub output: Option<PathBuf>,
}

/// Sequences authentication, discovery, resolution and download.
pub struct Orchestrator {
    settings: Settings,
    authenticator: Authenticator,
    resolver: StreamResolver,
    executor: Arc<dyn DownloadExecutor>,
    pacing: Pacing,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        fetcher: Arc<dyn MetadataFetcher>,
        executor: Arc<dyn DownloadExecutor>,
    ) -> Self {
        let authenticator = Authenticator::new(
            settings.endpoints.clone(),
            &settings.timing,
            SessionStore::new(settings.session_path()),
        );
        let resolver = StreamResolver::new(settings.endpoints.clone(), &settings.timing, fetcher);
        let pacing = Pacing::from_timing(&settings.timing);

        Self {
            settings,
            authenticator,
            resolver,
            executor,
            pacing,
            events: Arc::new(|_: &BatchEvent| {}),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn emit(&self, event: &BatchEvent) {
        (self.events)(event);
    }

    /// Download whatever `url` points at: a whole season, or one episode or
    /// trailer.
    pub async fn run(
        &self,
        browser: &dyn Browser,
        url: &str,
        credentials: Option<&Credentials>,
        options: &RunOptions,
    ) -> Result<BatchResult, BatchError> {
        match taxonomy::classify(url) {
            UrlKind::Season => self.run_season(browser, url, credentials, options).await,
            UrlKind::Single | UrlKind::Trailer => {
                self.run_single(browser, url, credentials, options).await
            }
        }
    }

    /// Download every missing episode linked from a season page.
    #[instrument(skip(self, browser, credentials, options))]
    pub async fn run_season(
        &self,
        browser: &dyn Browser,
        season_url: &str,
        credentials: Option<&Credentials>,
        options: &RunOptions,
    ) -> Result<BatchResult, BatchError> {
        self.authenticate(browser, credentials).await?;

        let identity = taxonomy::parse(season_url);
        let urls = self.discover(browser, season_url, &identity.program).await?;
        self.emit(&BatchEvent::Discovered { found: urls.len() });

        let candidates: Vec<(String, String)> = urls
            .into_iter()
            .map(|url| {
                let name = taxonomy::parse(&url).file_name();
                (url, name)
            })
            .collect();

        let dir = self.output_dir(&identity.program, options);
        let plan = self.build_plan(&candidates, &dir, options)?;
        Ok(self.execute(browser, &plan).await)
    }

    /// Download a single episode or trailer, unless it is already present.
    #[instrument(skip(self, browser, credentials, options))]
    pub async fn run_single(
        &self,
        browser: &dyn Browser,
        url: &str,
        credentials: Option<&Credentials>,
        options: &RunOptions,
    ) -> Result<BatchResult, BatchError> {
        self.authenticate(browser, credentials).await?;

        let identity = taxonomy::parse(url);
        let (dir, name) = match options.output.as_deref().filter(|p| is_media_file(p)) {
            Some(file) => (
                file.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| identity.file_name()),
            ),
            None => (self.output_dir(&identity.program, options), identity.file_name()),
        };

        let plan = self.build_plan(&[(url.to_string(), name)], &dir, options)?;
        Ok(self.execute(browser, &plan).await)
    }

    async fn authenticate(
        &self,
        browser: &dyn Browser,
        credentials: Option<&Credentials>,
    ) -> Result<(), BatchError> {
        self.authenticator
            .ensure_session(browser, credentials)
            .await?;
        self.emit(&BatchEvent::Authenticated);
        Ok(())
    }

    async fn discover(
        &self,
        browser: &dyn Browser,
        season_url: &str,
        program: &str,
    ) -> Result<Vec<String>, BatchError> {
        let page = browser.new_page().await?;
        let html = load_content(page.as_ref(), season_url).await;
        close_page(page.as_ref()).await;

        let html = html.map_err(|source| BatchError::Discovery {
            url: season_url.to_string(),
            source,
        })?;

        let urls = discovery::discover(&html, season_url);
        if program.is_empty() {
            return Ok(urls);
        }

        let found = urls.len();
        let scoped = discovery::retain_program(urls, program);
        if scoped.len() < found {
            debug!(dropped = found - scoped.len(), program, "ignoring links to other programs");
        }
        Ok(scoped)
    }

    fn build_plan(
        &self,
        candidates: &[(String, String)],
        dir: &Path,
        options: &RunOptions,
    ) -> Result<BatchPlan, BatchError> {
        let existing = inventory::existing_files(dir).map_err(|source| BatchError::Inventory {
            path: dir.to_path_buf(),
            source,
        })?;

        let plan = plan_downloads(
            candidates,
            &existing,
            options.start_episode,
            options.force,
            dir,
        );
        info!(
            planned = plan.len(),
            candidates = candidates.len(),
            dir = %dir.display(),
            "download plan built"
        );
        self.emit(&BatchEvent::Planned {
            total: plan.len(),
            skipped: candidates.len() - plan.len(),
        });
        Ok(plan)
    }

    /// `-o <dir>` when given, else `{media_dir}/{program}`.
    fn output_dir(&self, program: &str, options: &RunOptions) -> PathBuf {
        match options.output.as_deref().filter(|p| !is_media_file(p)) {
            Some(dir) => dir.to_path_buf(),
            None if program.is_empty() => self.settings.media_dir.clone(),
            None => self.settings.media_dir.join(program),
        }
    }

    /// Run every planned episode in order, isolating failures.
    pub async fn execute(&self, browser: &dyn Browser, plan: &BatchPlan) -> BatchResult {
        let mut result = BatchResult {
            planned: plan.len(),
            ..BatchResult::default()
        };
        let total = plan.len();

        for (index, item) in plan.items().iter().enumerate() {
            if index > 0 {
                let delay = self.pacing.next_delay();
                self.emit(&BatchEvent::Pausing { delay });
                tokio::time::sleep(delay).await;
            }

            self.emit(&BatchEvent::Started {
                index: index + 1,
                total,
                file_name: item.file_name.clone(),
            });

            match self.process(browser, item).await {
                Ok(outcome) => {
                    info!(
                        executor = self.executor.name(),
                        path = %outcome.path.display(),
                        bytes = outcome.bytes,
                        elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
                        "episode downloaded"
                    );
                    result.succeeded += 1;
                    self.emit(&BatchEvent::Succeeded {
                        file_name: item.file_name.clone(),
                        bytes: outcome.bytes,
                        elapsed: outcome.elapsed,
                    });
                }
                Err(e) => {
                    warn!(file = %item.file_name, "episode failed: {e}");
                    result.failed += 1;
                    result.failures.push((item.file_name.clone(), e.to_string()));
                    self.emit(&BatchEvent::Failed {
                        file_name: item.file_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            planned = result.planned,
            "batch finished"
        );
        result
    }

    /// One episode on its own page; the page is closed whatever happens.
    async fn process(
        &self,
        browser: &dyn Browser,
        item: &PlannedEpisode,
    ) -> Result<DownloadOutcome, EpisodeError> {
        let page = browser.new_page().await?;
        let outcome = self.resolve_and_download(browser, page.as_ref(), item).await;
        close_page(page.as_ref()).await;
        outcome
    }

    async fn resolve_and_download(
        &self,
        browser: &dyn Browser,
        page: &dyn BrowserPage,
        item: &PlannedEpisode,
    ) -> Result<DownloadOutcome, EpisodeError> {
        let resolved = self.resolver.resolve(browser, page, &item.url).await?;
        self.emit(&BatchEvent::Resolved {
            title: resolved.title.clone(),
            kind: resolved.target.kind,
        });

        if !resolved.is_drm_free() {
            let drm = resolved.drm_label().to_string();
            return Err(EpisodeError::Protected {
                title: resolved.title,
                drm,
            });
        }

        let cookies = browser.cookies().await?;
        let request = DownloadRequest::new(&resolved.target.url, &item.output)
            .with_header("Cookie", &cookie_header(&cookies))
            .with_header("Referer", &self.settings.endpoints.referer)
            .with_header("User-Agent", &self.settings.user_agent);

        let outcome = self
            .executor
            .download(&request, Some(self.progress_callback(&item.file_name)))
            .await?;
        Ok(outcome)
    }

    fn progress_callback(&self, file_name: &str) -> ProgressCallback {
        let events = Arc::clone(&self.events);
        let file_name = file_name.to_string();
        Box::new(move |progress: DownloadProgress| {
            events(&BatchEvent::Progress {
                file_name: file_name.clone(),
                progress,
            });
        })
    }
}

async fn load_content(
    page: &dyn BrowserPage,
    url: &str,
) -> Result<String, crate::browser::BrowserError> {
    page.goto(url).await?;
    page.content().await
}

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MEDIA_EXTENSION))
}
