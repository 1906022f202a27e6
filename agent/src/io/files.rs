//! Repository file listings.

use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Relative paths of every regular file under `root`, sorted, one per line.
pub fn list_files(root: &Path) -> Result<String> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        paths.push(relative.to_string_lossy().into_owned());
    }
    paths.sort();
    Ok(paths.join("\n"))
}
