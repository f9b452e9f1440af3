/// rootforge error types and handling utilities
use crate::build::phase::Stage;
use crate::config::ConfigError;
use thiserror::Error;

/// Main error type returned by the build pipeline.
///
/// Every variant except `Configuration` is tagged with the [`Stage`] that
/// produced it and keeps the underlying cause reachable through
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The image configuration failed to load or validate; nothing was written
    #[error("failed to validate configuration")]
    Configuration(#[source] ConfigError),

    /// Database, keyring, repository or world initialisation failed
    #[error("failed to {stage}")]
    PackageStateInit {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {stage}")]
    Fixation {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {stage}")]
    ScriptNormalization {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {stage}")]
    AccountMutation {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// Running a binary inside the workspace boundary failed
    #[error("failed to {stage}")]
    Execution {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {stage}")]
    SupervisionWrite {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {stage}")]
    Sbom {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// Packaging the finished workspace into a layer or image failed
    #[error("failed to {stage}")]
    Assembly {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    /// The stage that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            Self::Configuration(_) => Stage::Validate,
            Self::PackageStateInit { stage, .. }
            | Self::Fixation { stage, .. }
            | Self::ScriptNormalization { stage, .. }
            | Self::AccountMutation { stage, .. }
            | Self::Execution { stage, .. }
            | Self::SupervisionWrite { stage, .. }
            | Self::Sbom { stage, .. }
            | Self::Assembly { stage, .. } => *stage,
        }
    }

    /// Short category name, stable across releases (used in events and logs)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::PackageStateInit { .. } => "package-state-init",
            Self::Fixation { .. } => "fixation",
            Self::ScriptNormalization { .. } => "script-normalization",
            Self::AccountMutation { .. } => "account-mutation",
            Self::Execution { .. } => "execution",
            Self::SupervisionWrite { .. } => "supervision-write",
            Self::Sbom { .. } => "sbom",
            Self::Assembly { .. } => "assembly",
        }
    }
}

impl From<ConfigError> for BuildError {
    fn from(err: ConfigError) -> Self {
        BuildError::Configuration(err)
    }
}

/// Failure of a program run through an execution boundary
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {launcher} for {program}")]
    Spawn {
        launcher: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// Render an error and all of its causes on one line, outermost first.
///
/// This is what `{:#}` prints for an `anyhow::Error`. [`BuildError`] is a
/// plain `thiserror` type, so the chain is walked through `source()` here.
pub fn format_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}
