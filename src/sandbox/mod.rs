//! Execution boundaries for running image binaries against the workspace.
//!
//! Two variants share one interface: [`ChrootSandbox`] changes root
//! natively (needs privilege), [`ProotSandbox`] emulates the root change
//! in user space and can interpose qemu for foreign architectures. The
//! variant is chosen by configuration, never by probing the host.

pub mod chroot;
pub mod proot;

pub use chroot::ChrootSandbox;
pub use proot::ProotSandbox;

use crate::error::ExecError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Short name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Run `program` (a path inside `root`) with `args`, with `root` as `/`.
    async fn execute(&self, root: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError>;

    /// Like [`Sandbox::execute`], but a non-zero exit is an error.
    async fn run_checked(&self, root: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError> {
        let result = self.execute(root, program, args).await?;
        if !result.success() {
            return Err(ExecError::NonZeroExit {
                program: program.to_string(),
                code: result.exit_code,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(result)
    }
}

/// Spawn `launcher argv...` and collect its output.
pub(crate) async fn run_launcher(launcher: &Path, argv: Vec<OsString>, program: &str) -> Result<ExecResult, ExecError> {
    tracing::debug!(launcher = %launcher.display(), argv = ?argv, "spawning");

    let output = Command::new(launcher)
        .args(&argv)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            launcher: launcher.display().to_string(),
            program: program.to_string(),
            source,
        })?;

    Ok(ExecResult {
        // Killed by a signal: no code, report as failure
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
