//! Stream metadata returned by the media API.
//!
//! The endpoint answers with `title`, an optional `drmImplementation` and a
//! list of `targetUrls`. HLS is preferred because it is delivered without
//! DRM; a DASH-only answer is treated as protected.

use std::fmt;

use serde::Deserialize;

/// Delivery format of a target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Hls,
    Dash,
}

impl StreamKind {
    /// Map a declared target type. Unknown types are ignored.
    pub fn from_declared(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "hls" => Some(Self::Hls),
            "dash" | "mpeg_dash" => Some(Self::Dash),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hls => write!(f, "hls"),
            Self::Dash => write!(f, "dash"),
        }
    }
}

/// A playable endpoint of a declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub kind: StreamKind,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DeclaredTarget {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url: String,
}

/// Raw metadata document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub drm_implementation: Option<String>,
    #[serde(default)]
    target_urls: Vec<DeclaredTarget>,
}

impl StreamMetadata {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// All targets of a known kind, in declared order.
    pub fn targets(&self) -> impl Iterator<Item = StreamTarget> + '_ {
        self.target_urls
            .iter()
            .filter(|t| !t.url.is_empty())
            .filter_map(|t| {
                StreamKind::from_declared(&t.kind).map(|kind| StreamTarget {
                    kind,
                    url: t.url.clone(),
                })
            })
    }

    /// First HLS target, else first DASH target.
    pub fn select_target(&self) -> Option<StreamTarget> {
        self.targets()
            .find(|t| t.kind == StreamKind::Hls)
            .or_else(|| self.targets().find(|t| t.kind == StreamKind::Dash))
    }

    /// Combine with the selected target, if any.
    pub fn into_resolved(self) -> Option<ResolvedStream> {
        let target = self.select_target()?;
        Some(ResolvedStream {
            title: self.title,
            target,
            drm_implementation: self.drm_implementation.filter(|d| !d.is_empty()),
        })
    }
}

/// Outcome of one resolution attempt. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub title: String,
    pub target: StreamTarget,
    pub drm_implementation: Option<String>,
}

impl ResolvedStream {
    /// Only an HLS target is considered deliverable without keys.
    pub fn is_drm_free(&self) -> bool {
        self.target.kind == StreamKind::Hls
    }

    /// Declared DRM scheme, for reporting.
    pub fn drm_label(&self) -> &str {
        self.drm_implementation.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: &str = r#"{
        "title": "Thuis - Aflevering 6017",
        "drmImplementation": "widevine",
        "targetUrls": [
            { "type": "mpeg_dash", "url": "https://cdn.example/6017.mpd" },
            { "type": "hls", "url": "https://cdn.example/6017.m3u8" }
        ]
    }"#;

    #[test]
    fn test_hls_is_preferred_over_earlier_dash() {
        let resolved = StreamMetadata::from_json(BOTH).unwrap().into_resolved().unwrap();
        assert_eq!(resolved.target.kind, StreamKind::Hls);
        assert_eq!(resolved.target.url, "https://cdn.example/6017.m3u8");
        assert!(resolved.is_drm_free());
        // declared scheme is reported regardless of the chosen target
        assert_eq!(resolved.drm_label(), "widevine");
    }

    #[test]
    fn test_dash_only_is_never_drm_free() {
        let body = r#"{"title":"X","targetUrls":[{"type":"dash","url":"https://cdn.example/x.mpd"}]}"#;
        let resolved = StreamMetadata::from_json(body).unwrap().into_resolved().unwrap();
        assert_eq!(resolved.target.kind, StreamKind::Dash);
        assert!(!resolved.is_drm_free());
        assert_eq!(resolved.drm_label(), "unknown");
    }

    #[test]
    fn test_no_known_targets_resolves_to_none() {
        let body = r#"{"title":"X","targetUrls":[{"type":"smooth","url":"https://cdn.example/x.ism"}]}"#;
        assert!(StreamMetadata::from_json(body).unwrap().into_resolved().is_none());

        let empty = StreamMetadata::from_json(r#"{"title":"X"}"#).unwrap();
        assert!(empty.select_target().is_none());
    }

    #[test]
    fn test_first_hls_wins_among_several() {
        let body = r#"{"title":"X","targetUrls":[
            {"type":"HLS","url":"https://a/1.m3u8"},
            {"type":"hls","url":"https://a/2.m3u8"}]}"#;
        let target = StreamMetadata::from_json(body).unwrap().select_target().unwrap();
        assert_eq!(target.url, "https://a/1.m3u8");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(StreamMetadata::from_json("<html>").is_err());
    }
}
