use crate::export::utils::DigestWriter;
use crate::hasher::walk_tree;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};

#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Compressed blob, named after its digest
    pub path: PathBuf,
    pub digest: String,
    pub size: u64,
    /// Digest of the uncompressed tar stream
    pub diff_id: String,
}

fn header_for(entry_type: EntryType, mode: u32, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode & 0o7777);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Pack `root` into a gzip-compressed layer under `out_dir/blobs/sha256`.
///
/// Entries are added in sorted order, owned by 0:0, with every mtime set to
/// `mtime`. The same tree and timestamp always give the same bytes.
pub fn build_layer(root: &Path, mtime: u64, out_dir: &Path) -> Result<LayerInfo> {
    let blobs_dir = out_dir.join("blobs").join("sha256");
    fs::create_dir_all(&blobs_dir).with_context(|| format!("failed to create {}", blobs_dir.display()))?;

    let staging = blobs_dir.join("layer.tar.gz.partial");
    let file = File::create(&staging).with_context(|| format!("failed to create {}", staging.display()))?;

    let compressed = DigestWriter::new(BufWriter::new(file));
    let encoder = GzEncoder::new(compressed, Compression::default());
    let mut tar = Builder::new(DigestWriter::new(encoder));

    for rel in walk_tree(root)? {
        let path = root.join(&rel);
        let meta = fs::symlink_metadata(&path).with_context(|| format!("failed to stat {}", path.display()))?;
        let mode = meta.permissions().mode();
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            let mut header = header_for(EntryType::Symlink, 0o777, 0, mtime);
            tar.append_link(&mut header, &rel, &target)?;
        } else if file_type.is_dir() {
            let mut header = header_for(EntryType::Directory, mode, 0, mtime);
            tar.append_data(&mut header, &rel, io::empty())?;
        } else if file_type.is_file() {
            let mut header = header_for(EntryType::Regular, mode, meta.len(), mtime);
            let data = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            tar.append_data(&mut header, &rel, data)?;
        } else {
            tracing::warn!(path = %rel.display(), "skipping special file in layer");
        }
    }

    let uncompressed = tar.into_inner()?;
    let (encoder, diff_id, _) = uncompressed.finish();
    let compressed = encoder.finish()?;
    let (mut file, digest, size) = compressed.finish();
    file.flush()?;
    drop(file);

    let hex = digest.trim_start_matches("sha256:");
    let blob_path = blobs_dir.join(hex);
    fs::rename(&staging, &blob_path).with_context(|| format!("failed to move layer to {}", blob_path.display()))?;

    tracing::debug!(digest = %digest, size, "layer written");
    Ok(LayerInfo {
        path: blob_path,
        digest,
        size,
        diff_id,
    })
}
