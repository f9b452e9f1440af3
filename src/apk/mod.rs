//! Package state: database, keyring, repositories, world, and fixation.
//!
//! Everything up to fixation is plain file layout written natively;
//! fixation hands the prepared root to apk-tools, which resolves the world
//! and materialises the package set.

pub mod installed;
pub mod keyring;

use crate::build::BuildContext;
use crate::constants;
use crate::reproducible::{set_mtime, set_mtime_with_ancestors};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn init_db(&self, ctx: &BuildContext) -> Result<()>;
    async fn init_keyring(&self, ctx: &BuildContext) -> Result<()>;
    async fn init_repositories(&self, ctx: &BuildContext) -> Result<()>;
    async fn init_world(&self, ctx: &BuildContext) -> Result<()>;
    async fn fixate_world(&self, ctx: &BuildContext) -> Result<()>;
}

/// apk-tools backed package manager.
#[derive(Debug, Clone)]
pub struct ApkTools {
    pub apk_bin: PathBuf,
    http: reqwest::Client,
}

impl ApkTools {
    pub fn new(apk_bin: PathBuf) -> Self {
        Self {
            apk_bin,
            http: reqwest::Client::new(),
        }
    }

    /// Arguments for `apk fix` against the workspace
    pub fn fixate_args(&self, ctx: &BuildContext) -> Vec<String> {
        vec![
            "fix".to_string(),
            "--root".to_string(),
            ctx.workdir.display().to_string(),
            "--no-scripts".to_string(),
            "--no-cache".to_string(),
            "--update-cache".to_string(),
            "--arch".to_string(),
            ctx.arch.clone(),
        ]
    }
}

impl Default for ApkTools {
    fn default() -> Self {
        Self::new(PathBuf::from("apk"))
    }
}

#[async_trait]
impl PackageManager for ApkTools {
    async fn init_db(&self, ctx: &BuildContext) -> Result<()> {
        for dir in [constants::APK_CONFIG_DIR, constants::APK_DB_DIR, constants::APK_CACHE_DIR] {
            let path = ctx.path(dir);
            fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
        }

        let mtime = ctx.mtime();
        for file in ["installed", "lock", "triggers"] {
            write_file(&ctx.path(constants::APK_DB_DIR).join(file), b"", mtime).await?;
        }

        // An empty tar is two zero blocks
        write_file(&ctx.path(constants::APK_SCRIPTS_TAR), &[0u8; 1024], mtime).await?;
        write_file(&ctx.path(constants::APK_ARCH_FILE), format!("{}\n", ctx.arch).as_bytes(), mtime).await?;

        for dir in [constants::APK_CONFIG_DIR, constants::APK_DB_DIR, constants::APK_CACHE_DIR] {
            set_mtime_with_ancestors(&ctx.workdir, Path::new(dir), mtime)?;
        }

        tracing::debug!(arch = %ctx.arch, "initialized apk database");
        Ok(())
    }

    async fn init_keyring(&self, ctx: &BuildContext) -> Result<()> {
        let keys_dir = ctx.path(constants::APK_KEYS_DIR);
        fs::create_dir_all(&keys_dir)
            .await
            .with_context(|| format!("failed to create {}", keys_dir.display()))?;

        for source in &ctx.config.contents.keyring {
            let name = keyring::key_file_name(source)?;
            let data = keyring::fetch_key(&self.http, source, &ctx.config_dir).await?;
            write_file(&keys_dir.join(&name), &data, ctx.mtime()).await?;
            tracing::debug!(key = %name, "installed signing key");
        }
        // etc/apk itself is shared with the sibling stages
        set_mtime(&keys_dir, ctx.mtime())
    }

    async fn init_repositories(&self, ctx: &BuildContext) -> Result<()> {
        let content = lines(&ctx.config.contents.repositories);
        write_file(&ctx.path(constants::APK_REPOSITORIES_FILE), content.as_bytes(), ctx.mtime()).await
    }

    async fn init_world(&self, ctx: &BuildContext) -> Result<()> {
        let mut packages: Vec<&String> = Vec::new();
        for pkg in &ctx.config.contents.packages {
            if !packages.contains(&pkg) {
                packages.push(pkg);
            }
        }
        let content = lines(packages);
        write_file(&ctx.path(constants::APK_WORLD_FILE), content.as_bytes(), ctx.mtime()).await
    }

    async fn fixate_world(&self, ctx: &BuildContext) -> Result<()> {
        let args = self.fixate_args(ctx);
        tracing::info!(apk = %self.apk_bin.display(), "synchronizing with desired apk world");

        let output = Command::new(&self.apk_bin)
            .args(&args)
            .env("SOURCE_DATE_EPOCH", ctx.source_date_epoch().to_string())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.apk_bin.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "apk fix exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

fn lines<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().fold(String::new(), |mut out, item| {
        out.push_str(item.as_ref());
        out.push('\n');
        out
    })
}

/// Write `data` and stamp the file with the build timestamp.
async fn write_file(path: &Path, data: &[u8], mtime: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    set_mtime(path, mtime)
}
