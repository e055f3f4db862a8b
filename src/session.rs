//! Session cookie persistence.
//!
//! A [`Session`] is the cookie set captured after a successful login. The
//! [`SessionStore`] serializes it to a JSON file and restores it on the next
//! run. No validation happens here; whether a stored session is still good is
//! decided only by the authenticator's probe.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from reading or writing the session file.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("session file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: None,
        }
    }
}

/// Ordered cookie set representing an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub cookies: Vec<Cookie>,
    /// When the session was captured. Informational only; expiry is probed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self {
            cookies,
            saved_at: Some(Utc::now()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Build a `Cookie` header value from a cookie list.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// File-backed session storage. At most one session is kept.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the stored session. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored session");
                return Ok(None);
            }
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let session: Session =
            serde_json::from_str(&content).map_err(|source| SessionError::Json {
                path: self.path.clone(),
                source,
            })?;
        debug!(cookies = session.cookies.len(), "loaded stored session");
        Ok(Some(session))
    }

    /// Persist `session`, replacing whatever was stored before.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let io_err = |source| SessionError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io_err)?;
        debug!(path = %self.path.display(), cookies = session.cookies.len(), "session saved");
        Ok(())
    }
}
