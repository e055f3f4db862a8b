//! Scripted in-memory collaborators for tests.
//!
//! [`FakeBrowser`] lands navigations where the script says, replays scripted
//! network responses to matching observers and records every interaction.
//! [`FakeFetcher`] and [`FakeExecutor`] stand in for the metadata API and
//! ffmpeg.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Browser, BrowserError, BrowserPage, ObservedResponse, ResponsePredicate, ResponseSubscription,
};
use crate::error::{DownloadError, ResolutionError};
use crate::http_client::{ApiResponse, MetadataFetcher};
use crate::session::Cookie;
use crate::stream::backend::{DownloadExecutor, DownloadOutcome, DownloadRequest, ProgressCallback};

/// What a click does, consumed in order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClickEffect {
    pub land: Option<String>,
    pub cookies: Vec<Cookie>,
}

#[derive(Default)]
pub(crate) struct Script {
    pub landings: HashMap<String, String>,
    pub responses: HashMap<String, Vec<ObservedResponse>>,
    pub bodies: HashMap<String, String>,
    pub html: HashMap<String, String>,
    pub missing_selectors: HashSet<String>,
    pub failing_urls: HashSet<String>,
    pub click_effects: VecDeque<ClickEffect>,
    pub jar: Vec<Cookie>,

    pub visited: Vec<String>,
    pub filled: Vec<(String, String)>,
    pub clicked: Vec<String>,
    pub installed: Vec<Vec<Cookie>>,
    pub pages_opened: usize,
    pub pages_closed: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBrowser {
    script: Arc<Mutex<Script>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn land(&self, from: &str, to: &str) -> &Self {
        self.script()
            .landings
            .insert(from.to_string(), to.to_string());
        self
    }

    pub fn respond(&self, on_url: &str, response: ObservedResponse) -> &Self {
        self.script()
            .responses
            .entry(on_url.to_string())
            .or_default()
            .push(response);
        self
    }

    pub fn body(&self, request_id: &str, body: &str) -> &Self {
        self.script()
            .bodies
            .insert(request_id.to_string(), body.to_string());
        self
    }

    pub fn html(&self, url: &str, html: &str) -> &Self {
        self.script().html.insert(url.to_string(), html.to_string());
        self
    }

    pub fn on_click(&self, effect: ClickEffect) -> &Self {
        self.script().click_effects.push_back(effect);
        self
    }

    pub fn fail(&self, url: &str) -> &Self {
        self.script().failing_urls.insert(url.to_string());
        self
    }

    pub fn visited(&self) -> Vec<String> {
        self.script().visited.clone()
    }
}

/// Observed response helper.
pub(crate) fn response(request_id: &str, url: &str, status: u16, location: Option<&str>) -> ObservedResponse {
    let mut headers = HashMap::new();
    if let Some(location) = location {
        headers.insert("location".to_string(), location.to_string());
    }
    ObservedResponse {
        request_id: request_id.to_string(),
        url: url.to_string(),
        status,
        headers,
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        self.script().pages_opened += 1;
        Ok(Box::new(FakePage {
            script: Arc::clone(&self.script),
            current: Mutex::new("about:blank".to_string()),
            observers: Mutex::new(Vec::new()),
        }))
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self.script().jar.clone())
    }

    async fn replace_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        let mut script = self.script();
        script.jar = cookies.to_vec();
        script.installed.push(cookies.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

struct FakePage {
    script: Arc<Mutex<Script>>,
    current: Mutex<String>,
    observers: Mutex<Vec<(ResponsePredicate, mpsc::UnboundedSender<ObservedResponse>)>>,
}

impl FakePage {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let (landed, responses) = {
            let mut script = self.script();
            script.visited.push(url.to_string());
            if script.failing_urls.contains(url) {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                });
            }
            (
                script
                    .landings
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| url.to_string()),
                script.responses.get(url).cloned().unwrap_or_default(),
            )
        };

        *self.current.lock().unwrap() = landed;
        let observers = self.observers.lock().unwrap();
        for response in responses {
            for (predicate, tx) in observers.iter() {
                if predicate(&response) {
                    let _ = tx.send(response.clone());
                }
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let current = self.current.lock().unwrap().clone();
        Ok(self
            .script()
            .html
            .get(&current)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        Ok(!self.script().missing_selectors.contains(selector))
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let mut script = self.script();
        if script.missing_selectors.contains(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        script.filled.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let effect = {
            let mut script = self.script();
            if script.missing_selectors.contains(selector) {
                return Err(BrowserError::ElementNotFound(selector.to_string()));
            }
            script.clicked.push(selector.to_string());
            let effect = script.click_effects.pop_front().unwrap_or_default();
            script.jar.extend(effect.cookies.iter().cloned());
            effect
        };
        if let Some(land) = effect.land {
            *self.current.lock().unwrap() = land;
        }
        Ok(())
    }

    fn observe(&self, predicate: ResponsePredicate) -> ResponseSubscription {
        let (tx, subscription) = ResponseSubscription::channel();
        self.observers.lock().unwrap().push((predicate, tx));
        subscription
    }

    async fn response_body(&self, request_id: &str) -> Result<String, BrowserError> {
        self.script()
            .bodies
            .get(request_id)
            .cloned()
            .ok_or_else(|| BrowserError::Protocol {
                method: "Network.getResponseBody".to_string(),
                message: format!("no body for {request_id}"),
            })
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.script().pages_closed += 1;
        Ok(())
    }
}

/// Metadata API answering from a fixed table; unknown URLs get a 404.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    responses: HashMap<String, ApiResponse>,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, url: &str, status: u16, body: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            ApiResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, cookie_header: &str) -> Result<ApiResponse, ResolutionError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), cookie_header.to_string()));
        Ok(self.responses.get(url).cloned().unwrap_or(ApiResponse {
            status: 404,
            body: String::new(),
        }))
    }
}

/// Executor that writes a small file instead of running ffmpeg.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    failing_urls: HashSet<String>,
    pub requests: Mutex<Vec<DownloadRequest>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.output.clone())
            .collect()
    }
}

#[async_trait]
impl DownloadExecutor for FakeExecutor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn check_available(&self) -> bool {
        true
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        _progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.failing_urls.contains(&request.url) {
            return Err(DownloadError::Failed {
                tool: "fake".to_string(),
                status: "exit status: 1".to_string(),
                diagnostic: "HTTP error 403 Forbidden".to_string(),
            });
        }

        let io_err = |source| DownloadError::Io {
            path: request.output.clone(),
            source,
        };
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&request.output, b"fake media").map_err(io_err)?;

        Ok(DownloadOutcome {
            path: request.output.clone(),
            bytes: 10,
            elapsed: Duration::ZERO,
        })
    }
}
