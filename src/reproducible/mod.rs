//! Timestamp-independent rewriting of workspace artifacts.

pub mod normalize;

pub use normalize::rebuild_tar;

use crate::build::BuildContext;
use crate::constants::APK_SCRIPTS_TAR;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[async_trait]
pub trait ScriptNormalizer: Send + Sync {
    async fn normalize_scripts(&self, ctx: &BuildContext) -> Result<()>;
}

/// Rewrites `lib/apk/db/scripts.tar` with [`rebuild_tar`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TarScriptNormalizer;

#[async_trait]
impl ScriptNormalizer for TarScriptNormalizer {
    async fn normalize_scripts(&self, ctx: &BuildContext) -> Result<()> {
        let path = ctx.path(APK_SCRIPTS_TAR);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "no scripts archive to normalize");
            return Ok(());
        }

        let original = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let normalized = rebuild_tar(&original[..], Vec::new(), ctx.mtime())
            .with_context(|| format!("failed to re-pack {}", path.display()))?;

        tokio::fs::write(&path, &normalized)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        set_mtime(&path, ctx.mtime())?;

        tracing::debug!(bytes = normalized.len(), "normalized scripts archive");
        Ok(())
    }
}

/// Set the modification time of a file or directory to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) -> Result<()> {
    // futimens needs ownership, not a writable descriptor, so this works for directories too.
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.set_modified(mtime_to_system_time(secs))
        .with_context(|| format!("failed to set mtime on {}", path.display()))
}

/// Stamp `rel` and every ancestor of it below `root`.
///
/// Ancestors are stamped after their children, so creating an entry does
/// not leave the parent with the wall-clock time.
pub fn set_mtime_with_ancestors(root: &Path, rel: &Path, secs: u64) -> Result<()> {
    let mut current = Some(rel);
    while let Some(path) = current {
        if path.as_os_str().is_empty() {
            break;
        }
        set_mtime(&root.join(path), secs)?;
        current = path.parent();
    }
    Ok(())
}

pub fn mtime_to_system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
