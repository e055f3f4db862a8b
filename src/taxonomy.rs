//! Catalog URL taxonomy.
//!
//! Classifies VRT MAX catalog URLs and extracts the program / season /
//! episode identity they encode. Parsing is purely syntactic and never fails:
//! malformed input degrades to best-effort fields.
//!
//! ```text
//! https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6017/        single
//! https://www.vrt.be/vrtmax/a-z/thuis/31/                       season
//! https://www.vrt.be/vrtmax/a-z/thuis/?seizoen=seizoen-31       season
//! https://www.vrt.be/vrtmax/a-z/flikken-maastricht/trailer/...  trailer
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static EPISODE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z-]+)-s(\d+)a(\d+)$").unwrap());

static SEASON_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"seizoen-(\d+)").unwrap());

const TRAILER_MARKER: &str = "trailer";

/// Media file extension shared by the downloader and the inventory.
pub const MEDIA_EXTENSION: &str = "mp4";

/// What a catalog URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlKind {
    Single,
    Season,
    Trailer,
}

impl fmt::Display for UrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlKind::Single => write!(f, "single"),
            UrlKind::Season => write!(f, "season"),
            UrlKind::Trailer => write!(f, "trailer"),
        }
    }
}

/// Identity of a program, season or episode as encoded in its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeIdentity {
    pub program: String,
    /// Empty when unknown.
    pub season: String,
    /// Empty when unknown or when `kind` is [`UrlKind::Season`].
    pub episode: String,
    pub kind: UrlKind,
}

impl EpisodeIdentity {
    /// Episode number, if the episode field is numeric.
    pub fn episode_number(&self) -> Option<u32> {
        self.episode.parse().ok()
    }

    /// Canonical file name; see [`filename`].
    pub fn file_name(&self) -> String {
        filename(self)
    }
}

/// Path segments and query of a URL, with the trailing slash stripped.
struct UrlParts {
    segments: Vec<String>,
    query: Option<String>,
}

impl UrlParts {
    fn split(url: &str) -> Self {
        let trimmed = url.trim().trim_end_matches('/');

        if let Ok(parsed) = url::Url::parse(trimmed) {
            let segments = parsed
                .path_segments()
                .map(|segs| {
                    segs.filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            return Self {
                segments,
                query: parsed.query().map(str::to_string),
            };
        }

        // Not an absolute URL: fall back to splitting the raw string.
        debug!(url, "unparseable URL, splitting raw path");
        let (path, query) = match trimmed.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (trimmed, None),
        };
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query,
        }
    }

    fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    fn trailer_index(&self) -> Option<usize> {
        self.segments.iter().position(|s| s == TRAILER_MARKER)
    }

    fn query_season(&self) -> Option<String> {
        let query = self.query.as_deref()?;
        SEASON_QUERY
            .captures(query)
            .map(|caps| caps[1].to_string())
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Whether a single path segment is an episode slug (`thuis-s31a6017`).
pub fn is_episode_segment(segment: &str) -> bool {
    EPISODE_SEGMENT.is_match(segment)
}

/// Classify a catalog URL.
pub fn classify(url: &str) -> UrlKind {
    let parts = UrlParts::split(url);

    if parts.trailer_index().is_some() {
        return UrlKind::Trailer;
    }

    match parts.last() {
        Some(last) if is_episode_segment(last) => UrlKind::Single,
        Some(last) if is_numeric(last) => UrlKind::Season,
        _ if parts.query_season().is_some() => UrlKind::Season,
        _ => UrlKind::Single,
    }
}

/// Extract the identity a catalog URL encodes.
pub fn parse(url: &str) -> EpisodeIdentity {
    let parts = UrlParts::split(url);
    let kind = classify(url);

    let identity = match kind {
        UrlKind::Trailer => parse_trailer(&parts),
        UrlKind::Season => parse_season(&parts),
        UrlKind::Single => parse_single(&parts),
    };

    if identity.program.is_empty() {
        debug!(url, %kind, "no program structure recognised");
    }
    identity
}

fn parse_single(parts: &UrlParts) -> EpisodeIdentity {
    let last = parts.last().unwrap_or_default();

    if let Some(caps) = EPISODE_SEGMENT.captures(last) {
        return EpisodeIdentity {
            program: caps[1].to_string(),
            season: caps[2].to_string(),
            episode: caps[3].to_string(),
            kind: UrlKind::Single,
        };
    }

    EpisodeIdentity {
        program: last.to_string(),
        season: String::new(),
        episode: String::new(),
        kind: UrlKind::Single,
    }
}

fn parse_season(parts: &UrlParts) -> EpisodeIdentity {
    let segments = &parts.segments;

    if let Some(last) = parts.last().filter(|s| is_numeric(s)) {
        let program = segments
            .len()
            .checked_sub(2)
            .and_then(|i| segments.get(i))
            .cloned()
            .unwrap_or_default();
        return EpisodeIdentity {
            program,
            season: last.to_string(),
            episode: String::new(),
            kind: UrlKind::Season,
        };
    }

    EpisodeIdentity {
        program: parts.last().unwrap_or_default().to_string(),
        season: parts.query_season().unwrap_or_default(),
        episode: String::new(),
        kind: UrlKind::Season,
    }
}

fn parse_trailer(parts: &UrlParts) -> EpisodeIdentity {
    let segments = &parts.segments;
    let program = parts
        .trailer_index()
        .and_then(|idx| {
            // Prefer the slug right after the marker, then the one before it.
            segments
                .get(idx + 1)
                .map(|s| strip_trailer_suffix(s))
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    idx.checked_sub(1)
                        .and_then(|i| segments.get(i))
                        .map(|s| strip_trailer_suffix(s))
                })
        })
        .unwrap_or_default();

    EpisodeIdentity {
        program,
        season: String::new(),
        episode: String::new(),
        kind: UrlKind::Trailer,
    }
}

fn strip_trailer_suffix(segment: &str) -> String {
    let suffix = format!("-{TRAILER_MARKER}");
    match segment.find(&suffix) {
        Some(idx) => segment[..idx].to_string(),
        None if segment == TRAILER_MARKER => String::new(),
        None => segment.to_string(),
    }
}

/// Canonical on-disk file name for an identity.
///
/// `{program}-s{season}a{episode}.mp4` for numbered episodes,
/// `{program}-trailer.mp4` for trailers, `{program}.mp4` otherwise.
pub fn filename(identity: &EpisodeIdentity) -> String {
    let program = if identity.program.is_empty() {
        "video"
    } else {
        identity.program.as_str()
    };

    if identity.kind == UrlKind::Trailer {
        return format!("{program}-{TRAILER_MARKER}.{MEDIA_EXTENSION}");
    }

    if !identity.season.is_empty() && !identity.episode.is_empty() {
        return format!(
            "{program}-s{}a{}.{MEDIA_EXTENSION}",
            identity.season, identity.episode
        );
    }

    format!("{program}.{MEDIA_EXTENSION}")
}
