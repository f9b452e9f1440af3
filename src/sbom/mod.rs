//! Software bill of materials for the finished workspace.

pub mod spdx;

use crate::apk::installed::parse_installed;
use crate::build::BuildContext;
use crate::constants::APK_INSTALLED_FILE;
use crate::export::utils::sha256_bytes;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use spdx::{Document, Package};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait SbomGenerator: Send + Sync {
    async fn generate_sbom(&self, ctx: &BuildContext, output: &Path) -> Result<()>;
}

/// Emits an SPDX 2.2 JSON document from apk's installed database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpdxGenerator;

impl SpdxGenerator {
    pub fn document(&self, ctx: &BuildContext, installed: &str) -> Document {
        let packages = parse_installed(installed)
            .iter()
            .map(|pkg| Package::from_installed(pkg, &ctx.arch))
            .collect();

        let mut seed = installed.as_bytes().to_vec();
        seed.extend_from_slice(ctx.arch.as_bytes());

        Document::new(
            &format!("sbom-{}", ctx.arch),
            &sha256_bytes(&seed),
            ctx.build_date.to_rfc3339_opts(SecondsFormat::Secs, true),
            packages,
        )
    }
}

/// A directory gets `sbom-<arch>.spdx.json` inside it; anything else is the file path.
pub fn output_file(output: &Path, arch: &str) -> PathBuf {
    if output.is_dir() {
        output.join(format!("sbom-{}.spdx.json", arch))
    } else {
        output.to_path_buf()
    }
}

#[async_trait]
impl SbomGenerator for SpdxGenerator {
    async fn generate_sbom(&self, ctx: &BuildContext, output: &Path) -> Result<()> {
        let db = ctx.path(APK_INSTALLED_FILE);
        let installed = tokio::fs::read_to_string(&db)
            .await
            .with_context(|| format!("failed to read {}", db.display()))?;

        let document = self.document(ctx, &installed);
        let json = serde_json::to_string_pretty(&document)?;

        let path = output_file(output, &ctx.arch);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), packages = document.packages.len(), "wrote SBOM");
        Ok(())
    }
}
