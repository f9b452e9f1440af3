use crate::build::{BuildContext, Stage};
use crate::constants::{BUSYBOX_INSTALL_ARGS, BUSYBOX_PATH};
use crate::error::BuildError;
use anyhow::Context;
use std::io::ErrorKind;

/// Install the busybox applet symlinks, if busybox is in the image.
///
/// A workspace without `/bin/busybox` is not an error: the stage succeeds
/// without touching the execution boundary. The same holds when the
/// context has no boundary configured.
pub async fn maybe_install_symlinks(ctx: &BuildContext) -> Result<(), BuildError> {
    let stage = Stage::InstallSymlinks;
    let path = ctx.path(BUSYBOX_PATH);

    match tokio::fs::symlink_metadata(&path).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "busybox not installed, nothing to link");
            return Ok(());
        }
        Err(err) => {
            return Err(stage.fail(
                anyhow::Error::new(err).context(format!("failed to stat {}", path.display())),
            ))
        }
    }

    let Some(sandbox) = ctx.sandbox.as_ref() else {
        tracing::debug!("no execution boundary configured, leaving busybox unlinked");
        return Ok(());
    };

    let program = format!("/{}", BUSYBOX_PATH);
    tracing::info!(boundary = sandbox.name(), program = %program, "installing busybox symlinks");

    sandbox
        .run_checked(&ctx.workdir, &program, BUSYBOX_INSTALL_ARGS)
        .await
        .with_context(|| format!("failed to run {} inside {}", program, sandbox.name()))
        .map_err(|err| stage.fail(err))?;

    Ok(())
}
