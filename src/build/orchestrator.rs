use crate::accounts::{AccountMutator, PasswdAccounts};
use crate::apk::{ApkTools, PackageManager};
use crate::build::phase::{stages_are_disjoint, Phase, Stage, PIPELINE};
use crate::build::{symlinks, BuildContext};
use crate::error::{format_chain, BuildError};
use crate::observer::BuildEvent;
use crate::reproducible::{ScriptNormalizer, TarScriptNormalizer};
use crate::sbom::{SbomGenerator, SpdxGenerator};
use crate::supervision::{S6Supervision, SupervisionWriter};
use std::sync::Arc;
use std::time::Instant;

/// The collaborators each stage delegates to.
#[derive(Clone)]
pub struct Toolchain {
    pub packages: Arc<dyn PackageManager>,
    pub scripts: Arc<dyn ScriptNormalizer>,
    pub accounts: Arc<dyn AccountMutator>,
    pub supervision: Arc<dyn SupervisionWriter>,
    pub sbom: Arc<dyn SbomGenerator>,
}

impl Toolchain {
    pub fn new(apk: ApkTools) -> Self {
        Self {
            packages: Arc::new(apk),
            scripts: Arc::new(TarScriptNormalizer),
            accounts: Arc::new(PasswdAccounts),
            supervision: Arc::new(S6Supervision),
            sbom: Arc::new(SpdxGenerator),
        }
    }

    pub fn with_packages(mut self, packages: Arc<dyn PackageManager>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptNormalizer>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_accounts(mut self, accounts: Arc<dyn AccountMutator>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_supervision(mut self, supervision: Arc<dyn SupervisionWriter>) -> Self {
        self.supervision = supervision;
        self
    }

    pub fn with_sbom(mut self, sbom: Arc<dyn SbomGenerator>) -> Self {
        self.sbom = sbom;
        self
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new(ApkTools::default())
    }
}

/// Runs the build pipeline: phases in order, stages within a phase in parallel.
#[derive(Clone)]
pub struct ImageBuilder {
    ctx: Arc<BuildContext>,
    toolchain: Toolchain,
}

impl ImageBuilder {
    pub fn new(ctx: BuildContext) -> Self {
        Self::with_toolchain(ctx, Toolchain::default())
    }

    pub fn with_toolchain(ctx: BuildContext, toolchain: Toolchain) -> Self {
        Self {
            ctx: Arc::new(ctx),
            toolchain,
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Build the image filesystem in the context's workspace.
    ///
    /// Configuration errors are returned before anything is written. A
    /// failing phase stops the pipeline once all of its stages have
    /// finished; the first error in stage order is returned.
    pub async fn build_image(&self) -> Result<(), BuildError> {
        let start = Instant::now();

        for &phase in PIPELINE {
            self.run_phase(phase).await?;

            if phase == Phase::Validate {
                self.emit(BuildEvent::BuildStarted {
                    workdir: self.ctx.workdir.clone(),
                });
            }
        }

        self.emit(BuildEvent::BuildCompleted {
            workdir: self.ctx.workdir.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    async fn run_phase(&self, phase: Phase) -> Result<(), BuildError> {
        let stages: Vec<Stage> = phase
            .stages()
            .iter()
            .copied()
            .filter(|&stage| match self.skip_reason(stage) {
                Some(reason) => {
                    self.emit(BuildEvent::StageSkipped {
                        stage,
                        reason: reason.to_string(),
                    });
                    false
                }
                None => true,
            })
            .collect();

        if stages.is_empty() {
            return Ok(());
        }

        debug_assert!(
            stages_are_disjoint(&stages),
            "phase {} schedules stages with overlapping write sets",
            phase
        );

        self.emit(BuildEvent::PhaseStarted {
            phase,
            stages: stages.len(),
        });
        let start = Instant::now();

        let results = self.run_concurrent(&stages).await;

        let mut first_error = None;
        let mut failed_stages = Vec::new();
        for (stage, result) in results {
            if let Err(err) = result {
                failed_stages.push(stage);
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::debug!(stage = %stage, error = %format_chain(&err), "discarding additional phase error");
                }
            }
        }

        match first_error {
            Some(err) => {
                self.emit(BuildEvent::PhaseFailed { phase, failed_stages });
                Err(err)
            }
            None => {
                self.emit(BuildEvent::PhaseCompleted {
                    phase,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                Ok(())
            }
        }
    }

    /// Spawn every stage and wait for all of them; siblings are never cancelled.
    ///
    /// Single-stage phases go through here too, so a panicking collaborator
    /// surfaces as that stage's error rather than unwinding the build.
    async fn run_concurrent(&self, stages: &[Stage]) -> Vec<(Stage, Result<(), BuildError>)> {
        let handles = stages.iter().map(|&stage| {
            let builder = self.clone();
            tokio::spawn(async move { builder.run_stage(stage).await })
        });

        let joined = futures::future::join_all(handles).await;

        stages
            .iter()
            .copied()
            .zip(joined)
            .map(|(stage, joined)| {
                let result = joined.unwrap_or_else(|join_err| {
                    let err = stage.fail(join_failure(join_err));
                    self.emit(BuildEvent::StageFailed {
                        stage,
                        error: format_chain(&err),
                    });
                    Err(err)
                });
                (stage, result)
            })
            .collect()
    }

    async fn run_stage(&self, stage: Stage) -> Result<(), BuildError> {
        self.emit(BuildEvent::StageStarted { stage });
        let start = Instant::now();

        let result = self.dispatch(stage).await;

        match &result {
            Ok(()) => self.emit(BuildEvent::StageCompleted {
                stage,
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            Err(err) => self.emit(BuildEvent::StageFailed {
                stage,
                error: format_chain(err),
            }),
        }
        result
    }

    async fn dispatch(&self, stage: Stage) -> Result<(), BuildError> {
        let ctx = self.ctx.as_ref();
        let tc = &self.toolchain;

        let result = match stage {
            Stage::Validate => return ctx.config.validate().map_err(BuildError::from),
            Stage::InstallSymlinks => return symlinks::maybe_install_symlinks(ctx).await,
            Stage::InitDatabase => tc.packages.init_db(ctx).await,
            Stage::InitKeyring => tc.packages.init_keyring(ctx).await,
            Stage::InitRepositories => tc.packages.init_repositories(ctx).await,
            Stage::InitWorld => tc.packages.init_world(ctx).await,
            Stage::FixateWorld => tc.packages.fixate_world(ctx).await,
            Stage::NormalizeScripts => tc.scripts.normalize_scripts(ctx).await,
            Stage::MutateAccounts => tc.accounts.mutate_accounts(ctx).await,
            Stage::WriteSupervisionTree => tc.supervision.write_supervision_tree(ctx).await,
            Stage::GenerateSbom => match &ctx.sbom_path {
                Some(path) => tc.sbom.generate_sbom(ctx, path).await,
                None => Ok(()),
            },
            Stage::Assemble => Err(anyhow::anyhow!("image assembly runs after the pipeline, not inside it")),
        };

        result.map_err(|err| stage.fail(err))
    }

    fn skip_reason(&self, stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::InstallSymlinks if self.ctx.sandbox.is_none() => Some("no execution boundary configured"),
            Stage::GenerateSbom if self.ctx.sbom_path.is_none() => Some("no SBOM path configured"),
            _ => None,
        }
    }

    fn emit(&self, event: BuildEvent) {
        self.ctx.observer.on_event(event);
    }
}

fn join_failure(err: tokio::task::JoinError) -> anyhow::Error {
    if !err.is_panic() {
        return anyhow::anyhow!("stage task was cancelled");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("stage panicked: {}", message)
}
