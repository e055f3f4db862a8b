//! Episode discovery on season pages and download filtering.
//!
//! Discovered URLs are ordered lexically. That matches broadcast order only
//! because a season's episode numbers share a width (`a6001`..`a6050`).

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::taxonomy;

static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

static FILE_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-s\d+a(\d+)\.[A-Za-z0-9]+$").unwrap());

/// Base for relative links when the page URL itself does not parse.
const SITE_ROOT: &str = "https://www.vrt.be/";

/// Catalog path fragment every episode link carries.
const CATALOG_MARKER: &str = "/a-z/";

/// Sorted, de-duplicated episode URLs linked from a season page.
///
/// Relative and protocol-relative links are made absolute against
/// `page_url`; query strings and fragments are dropped and a trailing slash
/// is enforced before de-duplication.
pub fn discover(html: &str, page_url: &str) -> Vec<String> {
    let base = Url::parse(page_url)
        .or_else(|_| Url::parse(SITE_ROOT))
        .ok();
    let document = Html::parse_document(html);

    let found: BTreeSet<String> = document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| normalize(href, base.as_ref()))
        .filter(|url| is_episode_url(url))
        .collect();

    debug!(count = found.len(), "episode links discovered");
    found.into_iter().collect()
}

fn normalize(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Some(url.to_string())
}

/// Whether `url` has the per-episode catalog shape.
pub fn is_episode_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed.path().contains(CATALOG_MARKER)
        && parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .is_some_and(taxonomy::is_episode_segment)
}

/// Keep only URLs that belong to `program`.
pub fn retain_program(urls: Vec<String>, program: &str) -> Vec<String> {
    urls.into_iter()
        .filter(|url| taxonomy::parse(url).program == program)
        .collect()
}

/// Episode number embedded in a file name (`thuis-s31a6017.mp4` -> 6017).
pub fn episode_number_from_file_name(name: &str) -> Option<u32> {
    FILE_EPISODE
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}

/// File names still to download, in input order.
///
/// Drops names present in `existing` and, with a `start_episode`, names
/// whose episode number is below it. Names without an episode number are
/// never dropped by the cutoff.
pub fn filter(
    all: &[String],
    existing: &HashSet<String>,
    start_episode: Option<u32>,
) -> Vec<String> {
    all.iter()
        .filter(|name| !existing.contains(name.as_str()))
        .filter(|name| match (start_episode, episode_number_from_file_name(name)) {
            (Some(start), Some(number)) => number >= start,
            _ => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEASON: &str = "https://www.vrt.be/vrtmax/a-z/thuis/31/";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_discovers_sorted_unique_episode_links() {
        let html = r#"
            <a href="/vrtmax/a-z/thuis/31/thuis-s31a6003/">3</a>
            <a href="https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6001/">1</a>
            <a href="//www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6002">2</a>
            <a href="/vrtmax/a-z/thuis/31/thuis-s31a6001/?autoplay=true">1 again</a>
            <a href="/vrtmax/a-z/thuis/">program</a>
            <a href="/vrtmax/a-z/thuis/31/">season</a>
            <a href="mailto:kijker@vrt.be">mail</a>
            <a>no href</a>
        "#;

        assert_eq!(
            discover(html, SEASON),
            names(&[
                "https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6001/",
                "https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6002/",
                "https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6003/",
            ])
        );
    }

    #[test]
    fn test_discovery_is_idempotent_under_duplicates() {
        let link = r#"<a href="/vrtmax/a-z/thuis/31/thuis-s31a6001/">x</a>"#;
        assert_eq!(discover(link, SEASON), discover(&link.repeat(5), SEASON));
    }

    #[test]
    fn test_empty_page_discovers_nothing() {
        assert!(discover("", SEASON).is_empty());
        assert!(discover("<html><body><p>Geen afleveringen</p></body></html>", SEASON).is_empty());
    }

    #[test]
    fn test_unparseable_page_url_falls_back_to_site_root() {
        let html = r#"<a href="/vrtmax/a-z/thuis/31/thuis-s31a6001/">1</a>"#;
        assert_eq!(
            discover(html, "not a url"),
            names(&["https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6001/"])
        );
    }

    #[test]
    fn test_retain_program_drops_other_rails() {
        let urls = names(&[
            "https://www.vrt.be/vrtmax/a-z/de-ideale-wereld/5/de-ideale-wereld-s5a12/",
            "https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6001/",
        ]);
        assert_eq!(
            retain_program(urls, "thuis"),
            names(&["https://www.vrt.be/vrtmax/a-z/thuis/31/thuis-s31a6001/"])
        );
    }

    #[test]
    fn test_episode_number_from_names() {
        assert_eq!(episode_number_from_file_name("thuis-s31a6017.mp4"), Some(6017));
        assert_eq!(episode_number_from_file_name("flikken-maastricht-trailer.mp4"), None);
        assert_eq!(episode_number_from_file_name("thuis.mp4"), None);
    }

    #[test]
    fn test_filter_excludes_existing_only() {
        let all = names(&["thuis-s31a6001.mp4", "thuis-s31a6002.mp4"]);
        let existing: HashSet<String> = names(&["thuis-s31a6002.mp4"]).into_iter().collect();
        assert_eq!(filter(&all, &existing, None), names(&["thuis-s31a6001.mp4"]));
    }

    #[test]
    fn test_filter_applies_start_cutoff() {
        let all = names(&["thuis-s31a6001.mp4", "thuis-s31a6002.mp4", "thuis-s31a6003.mp4"]);
        assert_eq!(
            filter(&all, &HashSet::new(), Some(6002)),
            names(&["thuis-s31a6002.mp4", "thuis-s31a6003.mp4"])
        );
    }

    #[test]
    fn test_filter_combines_both_exclusions() {
        let all = names(&[
            "thuis-s31a6001.mp4",
            "thuis-s31a6002.mp4",
            "thuis-s31a6003.mp4",
            "thuis-s31a6004.mp4",
        ]);
        let existing: HashSet<String> = names(&["thuis-s31a6002.mp4"]).into_iter().collect();
        assert_eq!(
            filter(&all, &existing, Some(6001)),
            names(&["thuis-s31a6001.mp4", "thuis-s31a6003.mp4", "thuis-s31a6004.mp4"])
        );
    }

    #[test]
    fn test_filter_edge_cases() {
        assert!(filter(&[], &HashSet::new(), Some(1)).is_empty());
        let all = names(&["thuis-s31a6001.mp4", "thuis-s31a6002.mp4"]);
        assert!(filter(&all, &HashSet::new(), Some(9999)).is_empty());
        // unnumbered names survive any cutoff
        let all = names(&["thuis-trailer.mp4"]);
        assert_eq!(filter(&all, &HashSet::new(), Some(9999)), all);
    }
}
