//! The fixed phase plan of an image build.
//!
//! Phases are totally ordered. Stages inside one phase run concurrently and
//! must write to disjoint parts of the workspace; each stage declares the
//! workspace paths it may write so that invariant can be checked.

use crate::constants;
use crate::config::ConfigError;
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Validate,
    InitDatabase,
    InitKeyring,
    InitRepositories,
    InitWorld,
    FixateWorld,
    NormalizeScripts,
    MutateAccounts,
    InstallSymlinks,
    WriteSupervisionTree,
    GenerateSbom,
    Assemble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Validate,
    InitDatabase,
    InitPackageState,
    Fixate,
    Finalize,
    InstallSymlinks,
    SupervisionTree,
    Sbom,
}

/// Phases in execution order.
pub const PIPELINE: &[Phase] = &[
    Phase::Validate,
    Phase::InitDatabase,
    Phase::InitPackageState,
    Phase::Fixate,
    Phase::Finalize,
    Phase::InstallSymlinks,
    Phase::SupervisionTree,
    Phase::Sbom,
];

impl Phase {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Phase::Validate => &[Stage::Validate],
            Phase::InitDatabase => &[Stage::InitDatabase],
            Phase::InitPackageState => &[Stage::InitKeyring, Stage::InitRepositories, Stage::InitWorld],
            Phase::Fixate => &[Stage::FixateWorld],
            Phase::Finalize => &[Stage::NormalizeScripts, Stage::MutateAccounts],
            Phase::InstallSymlinks => &[Stage::InstallSymlinks],
            Phase::SupervisionTree => &[Stage::WriteSupervisionTree],
            Phase::Sbom => &[Stage::GenerateSbom],
        }
    }

    pub fn is_concurrent(self) -> bool {
        self.stages().len() > 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::InitDatabase => "init-database",
            Phase::InitPackageState => "init-package-state",
            Phase::Fixate => "fixate",
            Phase::Finalize => "finalize",
            Phase::InstallSymlinks => "install-symlinks",
            Phase::SupervisionTree => "supervision-tree",
            Phase::Sbom => "sbom",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Stage {
    /// Human-readable action, used as the error message ("failed to ...").
    pub fn description(self) -> &'static str {
        match self {
            Stage::Validate => "validate configuration",
            Stage::InitDatabase => "initialize apk database",
            Stage::InitKeyring => "initialize apk keyring",
            Stage::InitRepositories => "initialize apk repositories",
            Stage::InitWorld => "initialize apk world",
            Stage::FixateWorld => "fixate apk world",
            Stage::NormalizeScripts => "normalize scripts.tar",
            Stage::MutateAccounts => "mutate accounts",
            Stage::InstallSymlinks => "install busybox symlinks",
            Stage::WriteSupervisionTree => "write supervision tree",
            Stage::GenerateSbom => "generate SBOM",
            Stage::Assemble => "build OCI image",
        }
    }

    /// Workspace-relative paths this stage may create or modify.
    ///
    /// Only stages that share a phase with a sibling need a precise answer;
    /// sequential stages report `None` (they own the whole workspace).
    pub fn write_set(self) -> Option<&'static [&'static str]> {
        match self {
            Stage::InitKeyring => Some(&[constants::APK_KEYS_DIR]),
            Stage::InitRepositories => Some(&[constants::APK_REPOSITORIES_FILE]),
            Stage::InitWorld => Some(&[constants::APK_WORLD_FILE]),
            Stage::NormalizeScripts => Some(&[constants::APK_SCRIPTS_TAR]),
            Stage::MutateAccounts => Some(&[constants::PASSWD_FILE, constants::GROUP_FILE, "home"]),
            _ => None,
        }
    }

    /// Wrap a stage failure in the matching error category.
    pub fn fail(self, source: anyhow::Error) -> BuildError {
        let stage = self;
        match self {
            Stage::Validate => BuildError::Configuration(ConfigError::Other(source)),
            Stage::InitDatabase | Stage::InitKeyring | Stage::InitRepositories | Stage::InitWorld => {
                BuildError::PackageStateInit { stage, source }
            }
            Stage::FixateWorld => BuildError::Fixation { stage, source },
            Stage::NormalizeScripts => BuildError::ScriptNormalization { stage, source },
            Stage::MutateAccounts => BuildError::AccountMutation { stage, source },
            Stage::InstallSymlinks => BuildError::Execution { stage, source },
            Stage::WriteSupervisionTree => BuildError::SupervisionWrite { stage, source },
            Stage::GenerateSbom => BuildError::Sbom { stage, source },
            Stage::Assemble => BuildError::Assembly { stage, source },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// True when no two stages can write to the same workspace path.
///
/// Two write sets overlap if one path equals or is an ancestor of another.
/// A stage without a declared write set overlaps with everything.
pub fn stages_are_disjoint(stages: &[Stage]) -> bool {
    if stages.len() < 2 {
        return true;
    }

    for (i, a) in stages.iter().enumerate() {
        for b in &stages[i + 1..] {
            let (Some(wa), Some(wb)) = (a.write_set(), b.write_set()) else {
                return false;
            };
            for pa in wa {
                for pb in wb {
                    let (pa, pb) = (Path::new(pa), Path::new(pb));
                    if pa.starts_with(pb) || pb.starts_with(pa) {
                        return false;
                    }
                }
            }
        }
    }
    true
}
