//! Headless browser capability.
//!
//! The login flow and stream resolution drive a real browser through the
//! [`Browser`] and [`BrowserPage`] traits. [`ChromeBrowser`] implements them
//! over the Chrome DevTools Protocol; tests use in-memory fakes.
//!
//! Network responses are observed explicitly: a caller registers a predicate
//! with [`BrowserPage::observe`] and awaits matches on the returned
//! [`ResponseSubscription`] within a bounded window.

pub mod cdp;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::Cookie;

pub use cdp::{ChromeBrowser, ChromeOptions};

/// Browser capability errors.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("no Chromium executable found (tried: {0})")]
    NotFound(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("DevTools connection failed: {0}")]
    Connect(String),

    #[error("DevTools error in {method}: {message}")]
    Protocol { method: String, message: String },

    #[error("timed out after {timeout:?} waiting for {method}")]
    Timeout { method: String, timeout: Duration },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("browser connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A network response seen by a page, including redirect hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    /// Browser-assigned request id, usable with [`BrowserPage::response_body`].
    pub request_id: String,
    pub url: String,
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
}

impl ObservedResponse {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Redirect target, if this is a response carrying a `Location` header.
    pub fn location(&self) -> Option<&str> {
        self.header("location").filter(|l| !l.is_empty())
    }
}

/// Filter applied to every response a page sees.
pub type ResponsePredicate = Box<dyn Fn(&ObservedResponse) -> bool + Send + Sync>;

/// Receiving side of a response observer.
pub struct ResponseSubscription {
    rx: mpsc::UnboundedReceiver<ObservedResponse>,
}

impl ResponseSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ObservedResponse>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/subscription pair.
    pub fn channel() -> (mpsc::UnboundedSender<ObservedResponse>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// First matching response, waiting at most `wait`.
    ///
    /// Responses that arrived before the call are returned immediately.
    pub async fn first_within(&mut self, wait: Duration) -> Option<ObservedResponse> {
        if let Ok(response) = self.rx.try_recv() {
            return Some(response);
        }
        tokio::time::timeout(wait, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// A browser with a single shared cookie jar.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh page (tab).
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;

    /// All cookies currently in the jar.
    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;

    /// Clear the jar and install `cookies`.
    async fn replace_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// A single page. Navigation waits are bounded.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the load event plus the settle window.
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Focus the element and type `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Register an observer for responses matching `predicate`.
    fn observe(&self, predicate: ResponsePredicate) -> ResponseSubscription;

    /// Body of a previously observed response.
    async fn response_body(&self, request_id: &str) -> Result<String, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Close `page`, logging instead of failing.
pub async fn close_page(page: &dyn BrowserPage) {
    if let Err(e) = page.close().await {
        debug!("page close failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: &[(&str, &str)]) -> ObservedResponse {
        ObservedResponse {
            request_id: "1".to_string(),
            url: "https://example.com".to_string(),
            status: 302,
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let r = response(&[("location", "/videos/abc")]);
        assert_eq!(r.header("Location"), Some("/videos/abc"));
        assert_eq!(r.location(), Some("/videos/abc"));
    }

    #[test]
    fn test_empty_location_is_none() {
        assert_eq!(response(&[("location", "")]).location(), None);
        assert_eq!(response(&[]).location(), None);
    }

    #[tokio::test]
    async fn test_subscription_returns_buffered_response() {
        let (tx, mut sub) = ResponseSubscription::channel();
        tx.send(response(&[])).unwrap();
        let got = sub.first_within(Duration::from_millis(0)).await;
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_subscription_times_out_when_nothing_arrives() {
        let (_tx, mut sub) = ResponseSubscription::channel();
        let got = sub.first_within(Duration::from_millis(10)).await;
        assert!(got.is_none());
    }
}
