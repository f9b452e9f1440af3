use crate::export::{
    config::OCIConfig,
    layer::LayerInfo,
    manifest::{
        DockerManifestEntry, OCIDescriptor, OCIIndex, OCIManifest, CONFIG_MEDIA_TYPE, INDEX_MEDIA_TYPE,
        LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, REF_NAME_ANNOTATION,
    },
    utils::oci_digest,
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;

const OCI_LAYOUT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

enum Member {
    Dir,
    Bytes(Vec<u8>),
    File { path: PathBuf, size: u64 },
}

/// Add `:latest` when the reference carries neither a tag nor a digest.
pub fn normalize_ref(image_ref: &str) -> String {
    let name = image_ref.rsplit('/').next().unwrap_or(image_ref);
    if name.contains(':') || name.contains('@') {
        image_ref.to_string()
    } else {
        format!("{}:latest", image_ref)
    }
}

fn blob_name(digest: &str) -> String {
    format!("blobs/sha256/{}", digest.trim_start_matches("sha256:"))
}

/// Writes a single-layer image as one tarball that is both an OCI layout
/// and loadable with `docker load`.
pub struct OciExporter {
    image_ref: String,
    annotations: BTreeMap<String, String>,
    mtime: u64,
}

impl OciExporter {
    pub fn new(image_ref: &str) -> Self {
        Self {
            image_ref: normalize_ref(image_ref),
            annotations: BTreeMap::new(),
            mtime: 0,
        }
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Timestamp stamped on every tarball entry.
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    fn members(&self, layer: &LayerInfo, config: &OCIConfig) -> Result<BTreeMap<String, Member>> {
        let config_json = serde_json::to_vec_pretty(config)?;
        let config_digest = oci_digest(&config_json);

        let manifest = OCIManifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config: OCIDescriptor::new(CONFIG_MEDIA_TYPE, &config_digest, config_json.len() as u64),
            layers: vec![OCIDescriptor::new(LAYER_MEDIA_TYPE, &layer.digest, layer.size)],
            annotations: self.annotations.clone(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        let manifest_digest = oci_digest(&manifest_json);

        let mut manifest_desc = OCIDescriptor::new(MANIFEST_MEDIA_TYPE, &manifest_digest, manifest_json.len() as u64);
        manifest_desc
            .annotations
            .insert(REF_NAME_ANNOTATION.to_string(), self.image_ref.clone());
        let index = OCIIndex {
            schema_version: 2,
            media_type: INDEX_MEDIA_TYPE.to_string(),
            manifests: vec![manifest_desc],
        };

        let docker = vec![DockerManifestEntry {
            config: blob_name(&config_digest),
            repo_tags: vec![self.image_ref.clone()],
            layers: vec![blob_name(&layer.digest)],
        }];

        let mut members = BTreeMap::new();
        members.insert("blobs".to_string(), Member::Dir);
        members.insert("blobs/sha256".to_string(), Member::Dir);
        members.insert(blob_name(&config_digest), Member::Bytes(config_json));
        members.insert(blob_name(&manifest_digest), Member::Bytes(manifest_json));
        members.insert(
            blob_name(&layer.digest),
            Member::File {
                path: layer.path.clone(),
                size: layer.size,
            },
        );
        members.insert("index.json".to_string(), Member::Bytes(serde_json::to_vec_pretty(&index)?));
        members.insert("manifest.json".to_string(), Member::Bytes(serde_json::to_vec_pretty(&docker)?));
        members.insert("oci-layout".to_string(), Member::Bytes(OCI_LAYOUT.as_bytes().to_vec()));
        Ok(members)
    }

    fn append<W: Write>(&self, tar: &mut Builder<W>, name: &str, member: &Member) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_mtime(self.mtime);
        header.set_uid(0);
        header.set_gid(0);

        match member {
            Member::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                tar.append_data(&mut header, name, io::empty())?;
            }
            Member::Bytes(data) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                tar.append_data(&mut header, name, &data[..])?;
            }
            Member::File { path, size } => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(*size);
                let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
                tar.append_data(&mut header, name, file.take(*size))?;
            }
        }
        Ok(())
    }

    /// Write the image tarball to `output`, replacing it atomically.
    pub fn write_tarball(&self, layer: &LayerInfo, config: &OCIConfig, output: &Path) -> Result<PathBuf> {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).with_context(|| format!("failed to create {}", parent.display()))?;

        let staging = NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
        let mut tar = Builder::new(BufWriter::new(staging.reopen()?));

        for (name, member) in &self.members(layer, config)? {
            self.append(&mut tar, name, member)?;
        }
        tar.into_inner()?.flush()?;

        staging
            .persist(output)
            .with_context(|| format!("failed to write {}", output.display()))?;

        tracing::info!(image = %self.image_ref, path = %output.display(), "image tarball written");
        Ok(output.to_path_buf())
    }
}
