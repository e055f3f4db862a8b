//! Login credentials.
//!
//! Sources, highest priority first: command-line flags, the `VRT_USERNAME` /
//! `VRT_PASSWORD` environment variables, then a plaintext `KEY=value` file
//! written by `thuis --setup`. The file is not encrypted; it is created with
//! owner-only permissions on Unix and that is all the protection it gets.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const USERNAME_KEY: &str = "VRT_USERNAME";
pub const PASSWORD_KEY: &str = "VRT_PASSWORD";

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("both a username and a password are required")]
    Incomplete,
}

/// Username and password for the platform login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parse `KEY=value` lines. Blank lines and `#` comments are skipped and
/// surrounding quotes are removed.
pub fn parse(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Read a credentials file. A missing file yields no entries.
pub fn read_file(path: &Path) -> Result<HashMap<String, String>, CredentialsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no credentials file");
            Ok(HashMap::new())
        }
        Err(source) => Err(CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Pick each field from the first source that has a non-empty value.
pub fn merge(
    username: Option<String>,
    password: Option<String>,
    env: impl Fn(&str) -> Option<String>,
    file: &HashMap<String, String>,
) -> Option<Credentials> {
    let pick = |cli: Option<String>, key: &str| {
        cli.into_iter()
            .chain(env(key))
            .chain(file.get(key).cloned())
            .find(|v| !v.is_empty())
    };

    let username = pick(username, USERNAME_KEY)?;
    let password = pick(password, PASSWORD_KEY)?;
    Some(Credentials { username, password })
}

/// Resolve credentials from flags, the process environment and `path`.
///
/// `Ok(None)` means none are configured; that is only an error once a
/// login turns out to be necessary.
pub fn resolve(
    username: Option<String>,
    password: Option<String>,
    path: &Path,
) -> Result<Option<Credentials>, CredentialsError> {
    let file = read_file(path)?;
    Ok(merge(username, password, |key| std::env::var(key).ok(), &file))
}

/// Write credentials to `path`, replacing its content.
pub fn save(path: &Path, credentials: &Credentials) -> Result<(), CredentialsError> {
    let io_err = |source| CredentialsError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    write!(
        file,
        "{USERNAME_KEY}={}\n{PASSWORD_KEY}={}\n",
        credentials.username, credentials.password
    )
    .map_err(io_err)?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }

    debug!(path = %path.display(), "credentials saved");
    Ok(())
}

/// Ask for a username and password.
pub fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<Credentials, CredentialsError> {
    let mut ask = |label: &str| -> std::io::Result<String> {
        write!(output, "{label}: ")?;
        output.flush()?;
        let mut line = String::new();
        input.read_line(&mut line)?;
        Ok(line.trim().to_string())
    };

    let io_err = |source| CredentialsError::Io {
        path: PathBuf::from("<stdin>"),
        source,
    };
    let username = ask("VRT MAX e-mail").map_err(io_err)?;
    let password = ask("VRT MAX password").map_err(io_err)?;

    if username.is_empty() || password.is_empty() {
        return Err(CredentialsError::Incomplete);
    }
    Ok(Credentials { username, password })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_env_style_file() {
        let map = parse(
            "# stored by thuis\nVRT_USERNAME=jan@example.be\nexport VRT_PASSWORD=\"s3cr=t\"\n\ngarbage\n",
        );
        assert_eq!(map.get(USERNAME_KEY).map(String::as_str), Some("jan@example.be"));
        assert_eq!(map.get(PASSWORD_KEY).map(String::as_str), Some("s3cr=t"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_cli_beats_env_beats_file() {
        let file = parse("VRT_USERNAME=file@x\nVRT_PASSWORD=filepw\n");
        let env = |key: &str| (key == USERNAME_KEY).then(|| "env@x".to_string());

        let creds = merge(None, None, env, &file).unwrap();
        assert_eq!(creds.username, "env@x");
        assert_eq!(creds.password, "filepw");

        let creds = merge(Some("cli@x".to_string()), None, env, &file).unwrap();
        assert_eq!(creds.username, "cli@x");
    }

    #[test]
    fn test_incomplete_sources_yield_none() {
        let file = parse("VRT_USERNAME=only@x\n");
        assert!(merge(None, None, no_env, &file).is_none());
        assert!(merge(None, Some(String::new()), no_env, &file).is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file(&dir.path().join("absent.env")).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thuis").join("credentials.env");
        save(&path, &Credentials::new("jan@example.be", "pw")).unwrap();

        let creds = merge(None, None, no_env, &read_file(&path).unwrap()).unwrap();
        assert_eq!(creds, Credentials::new("jan@example.be", "pw"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_prompt_reads_two_lines() {
        let mut input = "jan@example.be\nhunter2\n".as_bytes();
        let mut output = Vec::new();
        let creds = prompt(&mut input, &mut output).unwrap();
        assert_eq!(creds, Credentials::new("jan@example.be", "hunter2"));
        assert!(String::from_utf8(output).unwrap().contains("password"));
    }

    #[test]
    fn test_prompt_rejects_blank_answers() {
        let mut input = "\n\n".as_bytes();
        let err = prompt(&mut input, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CredentialsError::Incomplete));
    }

    #[test]
    fn test_debug_redacts_password() {
        let shown = format!("{:?}", Credentials::new("jan", "hunter2"));
        assert!(!shown.contains("hunter2"));
    }
}
