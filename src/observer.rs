//! Structured build events and the sinks that receive them.
//!
//! The orchestrator reports phase and stage lifecycle through a
//! [`BuildObserver`] carried by the build context instead of calling a
//! process-wide logger.

use crate::build::phase::{Phase, Stage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildEvent {
    BuildStarted {
        workdir: PathBuf,
    },
    PhaseStarted {
        phase: Phase,
        stages: usize,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        duration_ms: u64,
    },
    StageFailed {
        stage: Stage,
        error: String,
    },
    StageSkipped {
        stage: Stage,
        reason: String,
    },
    PhaseCompleted {
        phase: Phase,
        duration_ms: u64,
    },
    PhaseFailed {
        phase: Phase,
        failed_stages: Vec<Stage>,
    },
    BuildCompleted {
        workdir: PathBuf,
        duration_ms: u64,
    },
}

pub trait BuildObserver: Send + Sync {
    fn on_event(&self, event: BuildEvent);
}

pub struct NoopObserver;
impl BuildObserver for NoopObserver {
    fn on_event(&self, _event: BuildEvent) {}
}

/// Forwards every event to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn on_event(&self, event: BuildEvent) {
        match event {
            BuildEvent::BuildStarted { workdir } => {
                tracing::info!(workdir = %workdir.display(), "building image filesystem");
            }
            BuildEvent::PhaseStarted { phase, stages } => {
                tracing::debug!(phase = %phase, stages, "phase started");
            }
            BuildEvent::StageStarted { stage } => {
                tracing::info!(stage = %stage, "stage started");
            }
            BuildEvent::StageCompleted { stage, duration_ms } => {
                tracing::debug!(stage = %stage, duration_ms, "stage completed");
            }
            BuildEvent::StageFailed { stage, error } => {
                tracing::error!(stage = %stage, error = %error, "stage failed");
            }
            BuildEvent::StageSkipped { stage, reason } => {
                tracing::info!(stage = %stage, reason = %reason, "stage skipped");
            }
            BuildEvent::PhaseCompleted { phase, duration_ms } => {
                tracing::debug!(phase = %phase, duration_ms, "phase completed");
            }
            BuildEvent::PhaseFailed {
                phase,
                failed_stages,
            } => {
                tracing::error!(phase = %phase, failed = ?failed_stages, "phase failed");
            }
            BuildEvent::BuildCompleted {
                workdir,
                duration_ms,
            } => {
                tracing::info!(
                    workdir = %workdir.display(),
                    duration_ms,
                    "finished building filesystem"
                );
            }
        }
    }
}
