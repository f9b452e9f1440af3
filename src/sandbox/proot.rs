use crate::build::host_arch;
use crate::error::ExecError;
use crate::sandbox::{run_launcher, ExecResult, Sandbox};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Host directories bound into the emulated root
const BINDS: &[&str] = &["/dev", "/proc", "/sys"];

/// User-space root change through proot, optionally with qemu user emulation.
#[derive(Debug, Clone)]
pub struct ProotSandbox {
    pub proot_bin: PathBuf,
    /// qemu user-mode interpreter for foreign-architecture binaries
    pub qemu: Option<String>,
}

impl ProotSandbox {
    pub fn new() -> Self {
        Self::with_binary(PathBuf::from("proot"))
    }

    pub fn with_binary(proot_bin: PathBuf) -> Self {
        Self { proot_bin, qemu: None }
    }

    /// Enable qemu when `target_arch` (an apk arch) differs from the host.
    pub fn for_arch(mut self, target_arch: &str) -> Self {
        self.qemu = if target_arch == host_arch() {
            None
        } else {
            Some(format!("qemu-{}", qemu_arch(target_arch)))
        };
        self
    }

    pub fn argv(&self, root: &Path, program: &str, args: &[&str]) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec!["-0".into(), "-r".into(), root.as_os_str().to_os_string()];
        for bind in BINDS {
            argv.push("-b".into());
            argv.push(OsString::from(bind));
        }
        argv.push("-w".into());
        argv.push("/".into());
        if let Some(qemu) = &self.qemu {
            argv.push("-q".into());
            argv.push(OsString::from(qemu));
        }
        argv.push(OsString::from(program));
        argv.extend(args.iter().map(OsString::from));
        argv
    }
}

impl Default for ProotSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for ProotSandbox {
    fn name(&self) -> &'static str {
        "proot"
    }

    async fn execute(&self, root: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError> {
        run_launcher(&self.proot_bin, self.argv(root, program, args), program).await
    }
}

/// qemu-user binary suffix for an apk architecture
pub fn qemu_arch(apk_arch: &str) -> &str {
    match apk_arch {
        "armv7" | "armhf" => "arm",
        "x86" => "i386",
        other => other,
    }
}
