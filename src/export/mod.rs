pub mod config;
pub mod layer;
pub mod manifest;
pub mod oci_exporter;
pub mod utils;

pub use oci_exporter::{normalize_ref, OciExporter};

use crate::build::BuildContext;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Package the finished workspace as an image tarball at `output`.
///
/// The layer is staged in a scratch directory outside the workspace so it
/// never ends up inside itself.
pub fn build_image_tarball(ctx: &BuildContext, image_ref: &str, output: &Path) -> Result<PathBuf> {
    let scratch = tempfile::tempdir().context("failed to create layer staging directory")?;
    let layer = layer::build_layer(&ctx.workdir, ctx.mtime(), scratch.path())?;
    let oci_config = config::create_config(&ctx.config, &layer, &ctx.arch, ctx.build_date);

    OciExporter::new(image_ref)
        .with_annotations(ctx.config.annotations.clone())
        .with_mtime(ctx.mtime())
        .write_tarball(&layer, &oci_config, output)
}
