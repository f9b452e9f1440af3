//! s6 service supervision tree for `service-bundle` entrypoints.

use crate::build::BuildContext;
use crate::constants::SUPERVISION_DIR;
use crate::reproducible::{set_mtime, set_mtime_with_ancestors};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;

#[async_trait]
pub trait SupervisionWriter: Send + Sync {
    async fn write_supervision_tree(&self, ctx: &BuildContext) -> Result<()>;
}

/// Writes `sv/<service>/run` execline scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct S6Supervision;

pub fn run_script(command: &str) -> String {
    format!("#!/bin/execlineb -P\n{}\n", command)
}

#[async_trait]
impl SupervisionWriter for S6Supervision {
    async fn write_supervision_tree(&self, ctx: &BuildContext) -> Result<()> {
        let entrypoint = &ctx.config.entrypoint;
        if !entrypoint.is_service_bundle() {
            tracing::debug!("entrypoint is not a service bundle, no supervision tree");
            return Ok(());
        }

        let root = ctx.path(SUPERVISION_DIR);
        for (name, command) in &entrypoint.services {
            let dir = root.join(name);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;

            let run = dir.join("run");
            tokio::fs::write(&run, run_script(command))
                .await
                .with_context(|| format!("failed to write {}", run.display()))?;
            tokio::fs::set_permissions(&run, std::fs::Permissions::from_mode(0o755))
                .await
                .with_context(|| format!("failed to chmod {}", run.display()))?;
            set_mtime(&run, ctx.mtime())?;

            tracing::debug!(service = %name, "wrote supervision script");
        }

        for name in entrypoint.services.keys() {
            set_mtime_with_ancestors(&ctx.workdir, &std::path::Path::new(SUPERVISION_DIR).join(name), ctx.mtime())?;
        }
        Ok(())
    }
}
