//! Image filesystem construction.
//!
//! [`BuildContext`] carries everything one build needs; [`ImageBuilder`]
//! runs the phase plan from [`phase::PIPELINE`] against it.

pub mod orchestrator;
pub mod phase;
pub mod symlinks;

pub use orchestrator::{ImageBuilder, Toolchain};
pub use phase::{Phase, Stage};
pub use symlinks::maybe_install_symlinks;

use crate::config::{ConfigError, ImageConfiguration};
use crate::observer::{BuildObserver, TracingObserver};
use crate::sandbox::Sandbox;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The unit of work for one image build.
///
/// The workspace is owned by the caller: the pipeline never deletes it.
#[derive(Clone)]
pub struct BuildContext {
    pub workdir: PathBuf,
    pub config: Arc<ImageConfiguration>,
    /// Directory relative keyring paths are resolved against
    pub config_dir: PathBuf,
    /// apk architecture, e.g. `x86_64` or `aarch64`
    pub arch: String,
    pub build_date: DateTime<Utc>,
    pub sbom_path: Option<PathBuf>,
    /// Boundary for running binaries inside the workspace; `None` skips
    /// the stages that need one
    pub sandbox: Option<Arc<dyn Sandbox>>,
    pub observer: Arc<dyn BuildObserver>,
}

impl BuildContext {
    pub fn new<P: AsRef<Path>>(workdir: P, config: ImageConfiguration) -> Self {
        let arch = config.archs.first().cloned().unwrap_or_else(host_arch);
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            config: Arc::new(config),
            config_dir: PathBuf::from("."),
            arch,
            build_date: Utc::now(),
            sbom_path: None,
            sandbox: None,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_config_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_build_date(mut self, build_date: DateTime<Utc>) -> Self {
        self.build_date = build_date;
        self
    }

    pub fn with_sbom_path(mut self, path: Option<PathBuf>) -> Self {
        self.sbom_path = path;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Absolute path of a workspace-relative path
    pub fn path(&self, rel: &str) -> PathBuf {
        self.workdir.join(rel)
    }

    /// Build date as seconds since the epoch
    pub fn source_date_epoch(&self) -> i64 {
        self.build_date.timestamp()
    }

    /// Build date as a tar/mtime value; dates before 1970 clamp to 0
    pub fn mtime(&self) -> u64 {
        self.source_date_epoch().max(0) as u64
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("workdir", &self.workdir)
            .field("arch", &self.arch)
            .field("build_date", &self.build_date)
            .field("sbom_path", &self.sbom_path)
            .field("sandbox", &self.sandbox.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

/// Parse a build date given as epoch seconds or an RFC 3339 timestamp.
pub fn parse_build_date(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidBuildDate {
        value: value.to_string(),
    };

    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        let secs: i64 = value.parse().map_err(|_| invalid())?;
        return Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid);
    }

    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| invalid())
}

/// apk architecture name of the running host
pub fn host_arch() -> String {
    match std::env::consts::ARCH {
        "arm" => "armv7",
        "powerpc64" => "ppc64le",
        other => other,
    }
    .to_string()
}
