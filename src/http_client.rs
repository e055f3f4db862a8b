//! HTTP client for the stream metadata API
//!
//! Features:
//! - TLS 1.3 via rustls
//! - Brotli, Gzip, Deflate (auto-negotiated)
//! - Connection reuse across the episodes of a batch
//! - Browser user agent and referer, session cookies per request

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::error::ResolutionError;

/// Status and body of a metadata response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Only `200 OK` carries usable metadata.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

/// Authenticated GET against the metadata endpoint.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch `url`, sending `cookie_header` verbatim when non-empty.
    async fn fetch(&self, url: &str, cookie_header: &str) -> Result<ApiResponse, ResolutionError>;
}

/// reqwest-backed [`MetadataFetcher`].
pub struct ApiClient {
    client: Client,
    referer: String,
}

impl ApiClient {
    pub fn new(user_agent: &str, referer: &str) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            // ═══════════════════════════════════════════════════════════════
            // CONNECTIONS
            // ═══════════════════════════════════════════════════════════════
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            // ═══════════════════════════════════════════════════════════════
            // COMPRESSION
            // ═══════════════════════════════════════════════════════════════
            .brotli(true)
            .gzip(true)
            .deflate(true)
            // ═══════════════════════════════════════════════════════════════
            // IDENTITY
            // ═══════════════════════════════════════════════════════════════
            .user_agent(user_agent)
            .default_headers(headers)
            // ═══════════════════════════════════════════════════════════════
            // TIMEOUTS & REDIRECTS
            // ═══════════════════════════════════════════════════════════════
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            referer: referer.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        Self::new(&settings.user_agent, &settings.endpoints.referer)
    }
}

#[async_trait]
impl MetadataFetcher for ApiClient {
    #[instrument(skip(self, cookie_header), fields(url = %url))]
    async fn fetch(&self, url: &str, cookie_header: &str) -> Result<ApiResponse, ResolutionError> {
        let mut request = self.client.get(url).header(REFERER, &self.referer);
        if !cookie_header.is_empty() {
            request = request.header(COOKIE, cookie_header);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        debug!(
            status,
            content_type = ?response.headers().get("content-type"),
            "metadata response received"
        );

        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> ApiResponse {
        ApiResponse {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_builds_from_default_settings() {
        let client = ApiClient::from_settings(&Settings::default()).unwrap();
        assert_eq!(client.referer, "https://www.vrt.be/");
    }

    #[test]
    fn test_only_200_is_ok() {
        assert!(response(200).is_ok());
        for status in [201, 203, 204, 206, 301, 401, 404, 500] {
            assert!(!response(status).is_ok(), "status {status}");
        }
    }
}
