//! Content digests of a workspace tree.

pub mod walker;

pub use walker::walk_tree;

use anyhow::{Context, Result};
use blake3::Hasher;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// BLAKE3 digest over every entry's path, type, permission bits, contents
/// and symlink target.
///
/// Modification times are not included: they are clamped to the build date
/// when the layer is written.
pub fn tree_digest(root: &Path) -> Result<String> {
    let mut hasher = Hasher::new();

    for rel in walk_tree(root)? {
        let path = root.join(&rel);
        let meta = fs::symlink_metadata(&path).with_context(|| format!("failed to stat {}", path.display()))?;
        let mode = meta.permissions().mode() & 0o7777;

        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(&path).with_context(|| format!("failed to read link {}", path.display()))?;
            hasher.update(b"l");
            hasher.update(target.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            hasher.update(b"d");
            hasher.update(&mode.to_le_bytes());
        } else {
            let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            hasher.update(b"f");
            hasher.update(&mode.to_le_bytes());
            hasher.update(&(data.len() as u64).to_le_bytes());
            hasher.update(blake3::hash(&data).as_bytes());
        }
        hasher.update(&[0]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
