//! Local media inventory.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::taxonomy::MEDIA_EXTENSION;

/// Names of the media files directly inside `dir`.
///
/// A missing directory is an empty inventory. Partial downloads carry a
/// `.part` suffix and are never listed.
pub fn existing_files(dir: &Path) -> std::io::Result<HashSet<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "no local inventory yet");
            return Ok(HashSet::new());
        }
        Err(e) => return Err(e),
    };

    let mut names = HashSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_media = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MEDIA_EXTENSION));
        if let (true, Some(name)) = (is_media, path.file_name().and_then(|n| n.to_str())) {
            names.insert(name.to_string());
        }
    }

    debug!(dir = %dir.display(), count = names.len(), "local inventory");
    Ok(names)
}
