//! Session lifecycle: probe a stored session, fall back to a browser login.
//!
//! ```text
//! NoSession -> ProbeExisting -> Authenticated
//!                            -> NeedsLogin -> LoggingIn -> Authenticated | AuthError
//! ```
//!
//! A login failure is terminal for the attempt; nothing here retries.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::browser::{close_page, Browser, BrowserError, BrowserPage};
use crate::config::{Endpoints, Timing};
use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::session::{Session, SessionStore};

/// Drives the platform's login form and keeps the session file current.
pub struct Authenticator {
    endpoints: Endpoints,
    step_pause: Duration,
    submit_pause: Duration,
    store: SessionStore,
}

impl Authenticator {
    pub fn new(endpoints: Endpoints, timing: &Timing, store: SessionStore) -> Self {
        Self {
            endpoints,
            step_pause: timing.login_step(),
            submit_pause: timing.login_submit(),
            store,
        }
    }

    /// Return a working session, logging in only when the stored one (if
    /// any) no longer gets past the login domain.
    ///
    /// `credentials` are needed only for an actual login.
    #[instrument(skip_all)]
    pub async fn ensure_session(
        &self,
        browser: &dyn Browser,
        credentials: Option<&Credentials>,
    ) -> Result<Session, AuthError> {
        match self.store.load() {
            Ok(Some(session)) if !session.is_empty() => match self.probe(browser, &session).await {
                Ok(true) => {
                    info!(cookies = session.cookies.len(), "stored session still valid");
                    return Ok(session);
                }
                Ok(false) => info!("stored session expired, logging in again"),
                Err(e) => warn!("session probe failed, logging in again: {e}"),
            },
            Ok(_) => debug!("no stored session"),
            Err(e) => warn!("ignoring unreadable session file: {e}"),
        }

        let credentials = credentials.ok_or(AuthError::MissingCredentials)?;
        let session = self.login(browser, credentials).await?;

        if let Err(e) = self.store.save(&session) {
            warn!("could not persist session: {e}");
        }
        Ok(session)
    }

    /// Install `session` in the browser and check where the probe page lands.
    async fn probe(&self, browser: &dyn Browser, session: &Session) -> Result<bool, BrowserError> {
        browser.replace_cookies(&session.cookies).await?;

        let page = browser.new_page().await?;
        let landed = visit(page.as_ref(), &self.endpoints.session_probe_url()).await;
        close_page(page.as_ref()).await;

        let landed = landed?;
        debug!(%landed, "session probe landed");
        Ok(!self.endpoints.is_login_url(&landed))
    }

    async fn login(
        &self,
        browser: &dyn Browser,
        credentials: &Credentials,
    ) -> Result<Session, AuthError> {
        info!(username = %credentials.username, "logging in");
        browser.replace_cookies(&[]).await?;

        let page = browser.new_page().await?;
        let landed = self.submit_login_form(page.as_ref(), credentials).await;
        close_page(page.as_ref()).await;

        let landed = landed?;
        if self.endpoints.is_login_url(&landed) {
            return Err(AuthError::Rejected { url: landed });
        }

        let cookies = browser.cookies().await?;
        info!(cookies = cookies.len(), "login succeeded");
        Ok(Session::new(cookies))
    }

    /// Fill identity, submit, fill password if presented, submit again.
    /// Returns the URL the page ends up on.
    async fn submit_login_form(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
    ) -> Result<String, BrowserError> {
        let endpoints = &self.endpoints;
        page.goto(&endpoints.authorization_url()).await?;

        page.fill(&endpoints.identity_selector, &credentials.username)
            .await?;
        page.click(&endpoints.submit_selector).await?;
        tokio::time::sleep(self.step_pause).await;

        if page.has_element(&endpoints.password_selector).await? {
            page.fill(&endpoints.password_selector, &credentials.password)
                .await?;
            page.click(&endpoints.submit_selector).await?;
            tokio::time::sleep(self.submit_pause).await;
        } else {
            debug!("no password field presented");
        }

        page.current_url().await
    }
}

async fn visit(page: &dyn BrowserPage, url: &str) -> Result<String, BrowserError> {
    page.goto(url).await?;
    page.current_url().await
}
