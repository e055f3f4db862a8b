//! Settings loaded from `~/.config/thuis/config.toml`.
//!
//! Every value has a default, so the file is optional and may contain only
//! the keys a user wants to override. Endpoint constants, timing windows and
//! the media directory all flow through [`Settings`]; components never read
//! process-wide state themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Desktop Chrome user agent presented to the platform.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Errors raised while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid pacing range: min {min_ms}ms exceeds max {max_ms}ms")]
    Pacing { min_ms: u64, max_ms: u64 },
}

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory for downloaded media. Files land in `{media_dir}/{program}/`.
    pub media_dir: PathBuf,
    /// User agent for both the browser and the metadata API client.
    pub user_agent: String,
    /// Override for the session cookie file.
    pub session_file: Option<PathBuf>,
    /// Override for the plaintext credentials file.
    pub credentials_file: Option<PathBuf>,
    pub endpoints: Endpoints,
    pub timing: Timing,
    pub browser: BrowserSettings,
    pub download: DownloadSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            session_file: None,
            credentials_file: None,
            endpoints: Endpoints::default(),
            timing: Timing::default(),
            browser: BrowserSettings::default(),
            download: DownloadSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default location when `None`.
    ///
    /// A missing file yields [`Settings::default`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(config_path, Path::to_path_buf);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    /// Parse settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.pace_min_ms > self.timing.pace_max_ms {
            return Err(ConfigError::Pacing {
                min_ms: self.timing.pace_min_ms,
                max_ms: self.timing.pace_max_ms,
            });
        }
        Ok(())
    }

    /// Resolved session file path.
    pub fn session_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| state_dir().join("session.json"))
    }

    /// Resolved credentials file path.
    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(|| state_dir().join("credentials.env"))
    }
}

/// Platform endpoints and the URL fragments used to recognise its responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// Substring of any URL that still belongs to the login domain.
    pub login_marker: String,
    /// Page navigated to when probing a restored session.
    pub probe_url: Option<String>,
    /// Landing page whose load triggers the player token grant.
    pub landing_url: String,
    /// Host that relative `Location` headers resolve against.
    pub media_api_base: String,
    /// Hostname fragment identifying the media aggregator.
    pub aggregator_marker: String,
    pub referer: String,
    pub identity_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://login.vrt.be/authorize".to_string(),
            client_id: "vrtnu-site".to_string(),
            redirect_uri: "https://www.vrt.be/vrtmax/sso/callback".to_string(),
            scope: "openid profile email video".to_string(),
            login_marker: "login.vrt.be".to_string(),
            probe_url: None,
            landing_url: "https://www.vrt.be/vrtmax/".to_string(),
            media_api_base: "https://media-services-public.vrt.be".to_string(),
            aggregator_marker: "vualto".to_string(),
            referer: "https://www.vrt.be/".to_string(),
            identity_selector: r#"input[type="email"]"#.to_string(),
            password_selector: r#"input[type="password"]"#.to_string(),
            submit_selector: r#"button[type="submit"]"#.to_string(),
        }
    }
}

impl Endpoints {
    /// Full authorization URL with `response_type`, `client_id`,
    /// `redirect_uri` and `scope` query parameters.
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scope),
        )
    }

    /// URL used to probe a restored session.
    ///
    /// Defaults to the authorization URL: with a live SSO cookie the login
    /// domain redirects straight back to the site, without one it stays put.
    pub fn session_probe_url(&self) -> String {
        self.probe_url
            .clone()
            .unwrap_or_else(|| self.authorization_url())
    }

    /// Whether `url` is still on the login domain.
    pub fn is_login_url(&self, url: &str) -> bool {
        url.to_lowercase().contains(&self.login_marker.to_lowercase())
    }
}

/// Wait windows, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Idle time after each navigation's load event.
    pub settle_ms: u64,
    /// Pause between login form steps.
    pub login_step_ms: u64,
    /// Pause after submitting the password.
    pub login_submit_ms: u64,
    /// How long to wait for the player token response.
    pub token_wait_ms: u64,
    /// How long to wait for the metadata redirect after episode navigation.
    pub redirect_wait_ms: u64,
    pub navigation_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub launch_timeout_ms: u64,
    /// Lower bound of the randomized delay between episodes.
    pub pace_min_ms: u64,
    /// Upper bound of the randomized delay between episodes.
    pub pace_max_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 3_000,
            login_step_ms: 3_000,
            login_submit_ms: 8_000,
            token_wait_ms: 5_000,
            redirect_wait_ms: 8_000,
            navigation_timeout_ms: 45_000,
            command_timeout_ms: 30_000,
            launch_timeout_ms: 20_000,
            pace_min_ms: 5_000,
            pace_max_ms: 15_000,
        }
    }
}

impl Timing {
    /// All windows zeroed; used by tests driving in-memory fakes.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            login_step_ms: 0,
            login_submit_ms: 0,
            token_wait_ms: 0,
            redirect_wait_ms: 0,
            navigation_timeout_ms: 1_000,
            command_timeout_ms: 1_000,
            launch_timeout_ms: 1_000,
            pace_min_ms: 0,
            pace_max_ms: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn login_step(&self) -> Duration {
        Duration::from_millis(self.login_step_ms)
    }

    pub fn login_submit(&self) -> Duration {
        Duration::from_millis(self.login_submit_ms)
    }

    pub fn token_wait(&self) -> Duration {
        Duration::from_millis(self.token_wait_ms)
    }

    pub fn redirect_wait(&self) -> Duration {
        Duration::from_millis(self.redirect_wait_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Chromium binary; searched in `PATH` when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// ffmpeg binary; searched in `PATH` when unset.
    pub ffmpeg: Option<PathBuf>,
}

/// Return the path to the settings file.
fn config_path() -> PathBuf {
    state_dir().join("config.toml")
}

/// Directory holding settings, session and credentials.
pub fn state_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thuis")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.media_dir, PathBuf::from("media"));
        assert!(settings.browser.headless);
        assert_eq!(settings.endpoints.login_marker, "login.vrt.be");
    }

    #[test]
    fn test_parse_partial_overrides() {
        let toml_str = r#"
media_dir = "/srv/media"

[timing]
pace_min_ms = 100
pace_max_ms = 200

[browser]
headless = false
"#;
        let settings = Settings::from_toml(toml_str).unwrap();
        assert_eq!(settings.media_dir, PathBuf::from("/srv/media"));
        assert_eq!(settings.timing.pace_min_ms, 100);
        assert_eq!(settings.timing.pace_max_ms, 200);
        // untouched keys keep their defaults
        assert_eq!(settings.timing.settle_ms, 3_000);
        assert!(!settings.browser.headless);
    }

    #[test]
    fn test_rejects_inverted_pacing_range() {
        let toml_str = "[timing]\npace_min_ms = 500\npace_max_ms = 100\n";
        let err = Settings::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Pacing { min_ms: 500, max_ms: 100 }));
    }

    #[test]
    fn test_authorization_url_carries_oauth_parameters() {
        let url = Endpoints::default().authorization_url();
        assert!(url.starts_with("https://login.vrt.be/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=vrtnu-site"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fwww.vrt.be%2Fvrtmax%2Fsso%2Fcallback"));
        assert!(url.contains("scope=openid%20profile%20email%20video"));
    }

    #[test]
    fn test_login_marker_detection() {
        let endpoints = Endpoints::default();
        assert!(!endpoints.is_login_url("https://www.vrt.be/vrtmax/"));
        assert!(!endpoints.is_login_url("https://www.vrt.be/vrtmax/a-z/thuis/"));
        assert!(endpoints.is_login_url("https://login.vrt.be/"));
        assert!(endpoints.is_login_url("https://LOGIN.vrt.be/?error=access_denied"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }
}
