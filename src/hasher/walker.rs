use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Walk a tree and return every entry below `root` (directories, files and
/// symlinks), relative to `root`.
///
/// Sorted by path so the order is independent of the filesystem. Symlinks
/// are reported, never followed. Unreadable entries are errors, not skipped.
pub fn walk_tree(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escapes {}", entry.path().display(), root.display()))?
            .to_path_buf();
        entries.push(rel);
    }

    entries.sort();
    Ok(entries)
}
