use crate::error::ExecError;
use crate::sandbox::{run_launcher, ExecResult, Sandbox};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Native root change through the host `chroot` binary. Requires privilege.
#[derive(Debug, Clone)]
pub struct ChrootSandbox {
    pub chroot_bin: PathBuf,
}

impl ChrootSandbox {
    pub fn new() -> Self {
        Self::with_binary(PathBuf::from("chroot"))
    }

    pub fn with_binary(chroot_bin: PathBuf) -> Self {
        Self { chroot_bin }
    }

    pub fn argv(&self, root: &Path, program: &str, args: &[&str]) -> Vec<OsString> {
        let mut argv = vec![root.as_os_str().to_os_string(), OsString::from(program)];
        argv.extend(args.iter().map(OsString::from));
        argv
    }
}

impl Default for ChrootSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for ChrootSandbox {
    fn name(&self) -> &'static str {
        "chroot"
    }

    async fn execute(&self, root: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError> {
        run_launcher(&self.chroot_bin, self.argv(root, program, args), program).await
    }
}
