//! Stream resolution: token grant, metadata redirect, metadata fetch.
//!
//! 1. Load the landing page so the player requests a token; the token
//!    response is observed but only logged.
//! 2. Load the episode page and wait for the aggregator's `/videos/`
//!    redirect. Its `Location`, resolved against the media API host, is the
//!    metadata endpoint.
//! 3. GET the metadata with the browser's current cookies and pick a target.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::metadata::{ResolvedStream, StreamMetadata};
use crate::browser::{Browser, BrowserPage, ObservedResponse, ResponsePredicate};
use crate::config::{Endpoints, Timing};
use crate::error::ResolutionError;
use crate::http_client::MetadataFetcher;
use crate::session::cookie_header;

/// Resolves episode pages to playable streams.
pub struct StreamResolver {
    endpoints: Endpoints,
    token_wait: Duration,
    redirect_wait: Duration,
    fetcher: Arc<dyn MetadataFetcher>,
}

impl StreamResolver {
    pub fn new(endpoints: Endpoints, timing: &Timing, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self {
            endpoints,
            token_wait: timing.token_wait(),
            redirect_wait: timing.redirect_wait(),
            fetcher,
        }
    }

    /// Resolve `episode_url` using `page`, which must belong to `browser`.
    #[instrument(skip(self, browser, page))]
    pub async fn resolve(
        &self,
        browser: &dyn Browser,
        page: &dyn BrowserPage,
        episode_url: &str,
    ) -> Result<ResolvedStream, ResolutionError> {
        self.acquire_player_token(page).await?;

        let mut redirects = page.observe(metadata_redirect_predicate(&self.endpoints));
        page.goto(episode_url).await?;

        let redirect = redirects
            .first_within(self.redirect_wait)
            .await
            .ok_or_else(|| ResolutionError::NoRedirect {
                episode_url: episode_url.to_string(),
            })?;
        let location = redirect.location().unwrap_or_default();
        let api_url = metadata_url(&self.endpoints.media_api_base, location)?;
        debug!(%api_url, status = redirect.status, "metadata redirect observed");

        let cookies = browser.cookies().await?;
        let response = self.fetcher.fetch(&api_url, &cookie_header(&cookies)).await?;
        if !response.is_ok() {
            return Err(ResolutionError::ApiStatus {
                status: response.status,
                url: api_url,
            });
        }

        let metadata = StreamMetadata::from_json(&response.body)?;
        let title = metadata.title.clone();
        let resolved = metadata
            .into_resolved()
            .ok_or(ResolutionError::NoPlayableTarget { title })?;

        info!(
            title = %resolved.title,
            kind = %resolved.target.kind,
            drm = resolved.drm_label(),
            "stream resolved"
        );
        Ok(resolved)
    }

    /// Load the landing page and read the player token, if one shows up.
    async fn acquire_player_token(&self, page: &dyn BrowserPage) -> Result<(), ResolutionError> {
        let mut tokens = page.observe(token_predicate(&self.endpoints));
        page.goto(&self.endpoints.landing_url).await?;

        let Some(response) = tokens.first_within(self.token_wait).await else {
            warn!("no player token response observed");
            return Ok(());
        };

        match page.response_body(&response.request_id).await {
            Ok(body) => match player_token(&body) {
                Some(token) => debug!(token_len = token.len(), "player token captured"),
                None => warn!("token response carried no vrtPlayerToken"),
            },
            Err(e) => warn!("could not read token response body: {e}"),
        }
        Ok(())
    }
}

fn token_predicate(endpoints: &Endpoints) -> ResponsePredicate {
    let marker = endpoints.aggregator_marker.clone();
    Box::new(move |r: &ObservedResponse| r.url.contains(&marker) && r.url.contains("/tokens"))
}

fn metadata_redirect_predicate(endpoints: &Endpoints) -> ResponsePredicate {
    let marker = endpoints.aggregator_marker.clone();
    Box::new(move |r: &ObservedResponse| {
        r.url.contains(&marker) && r.url.contains("/videos/") && r.location().is_some()
    })
}

/// Resolve a redirect `Location` against the media API host.
///
/// Absolute locations are returned unchanged.
pub fn metadata_url(base: &str, location: &str) -> Result<String, ResolutionError> {
    let invalid = |source| ResolutionError::InvalidLocation {
        location: location.to_string(),
        source,
    };
    let base = Url::parse(base).map_err(invalid)?;
    Ok(base.join(location).map_err(invalid)?.to_string())
}

/// `vrtPlayerToken` from a token response body.
fn player_token(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("vrtPlayerToken")?
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
