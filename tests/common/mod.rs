#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rootforge::accounts::AccountMutator;
use rootforge::apk::{ApkTools, PackageManager};
use rootforge::build::{BuildContext, Stage};
use rootforge::config::ImageConfiguration;
use rootforge::error::ExecError;
use rootforge::observer::{BuildEvent, BuildObserver};
use rootforge::sandbox::{ExecResult, Sandbox};
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG: &str = r#"
contents:
  repositories:
    - https://dl-cdn.alpinelinux.org/alpine/edge/main
  packages:
    - alpine-baselayout
    - busybox
entrypoint:
  command: /bin/sh -l
environment:
  LANG: C.UTF-8
accounts:
  run-as: nonroot
  users:
    - username: nonroot
      uid: 65532
  groups:
    - groupname: nonroot
      gid: 65532
      members: [nonroot]
archs: [x86_64]
"#;

pub fn config() -> ImageConfiguration {
    ImageConfiguration::from_yaml_str(CONFIG).unwrap()
}

/// Collects every event the pipeline emits.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<BuildEvent>>,
}

impl BuildObserver for RecordingObserver {
    fn on_event(&self, event: BuildEvent) {
        self.events.lock().push(event);
    }
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().clone()
    }

    pub fn completed(&self) -> Vec<Stage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::StageCompleted { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> Vec<Stage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::StageStarted { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }
}

const INSTALLED: &str = "P:musl\nV:1.2.4-r2\nA:x86_64\nL:MIT\n\nP:busybox\nV:1.36.1-r15\nA:x86_64\nL:GPL-2.0-only\n";

/// apk stand-in: real native initialisation, simulated fixation.
pub struct FakeApk {
    inner: ApkTools,
    pub fail_on: HashSet<Stage>,
    pub panic_on: Option<Stage>,
    pub with_busybox: bool,
    /// Slows every stage that is not set to fail
    pub delay: Duration,
    /// Applied before a stage decides whether to fail
    pub stage_delays: HashMap<Stage, Duration>,
    pub log: Mutex<Vec<(Stage, &'static str)>>,
}

impl FakeApk {
    pub fn new() -> Self {
        Self {
            inner: ApkTools::default(),
            fail_on: HashSet::new(),
            panic_on: None,
            with_busybox: true,
            delay: Duration::ZERO,
            stage_delays: HashMap::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, stage: Stage) -> Self {
        self.fail_on.insert(stage);
        self
    }

    pub fn panicking_on(mut self, stage: Stage) -> Self {
        self.panic_on = Some(stage);
        self
    }

    pub fn delaying(mut self, stage: Stage, delay: Duration) -> Self {
        self.stage_delays.insert(stage, delay);
        self
    }

    pub fn without_busybox(mut self) -> Self {
        self.with_busybox = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn finished(&self) -> Vec<Stage> {
        self.log
            .lock()
            .iter()
            .filter(|(_, what)| *what == "end")
            .map(|(stage, _)| *stage)
            .collect()
    }

    async fn enter(&self, stage: Stage) -> Result<()> {
        self.log.lock().push((stage, "start"));
        if let Some(delay) = self.stage_delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }
        if self.panic_on == Some(stage) {
            panic!("resolver bug");
        }
        if self.fail_on.contains(&stage) {
            anyhow::bail!("simulated {} failure", stage);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    fn leave(&self, stage: Stage) {
        self.log.lock().push((stage, "end"));
    }
}

#[async_trait]
impl PackageManager for FakeApk {
    async fn init_db(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::InitDatabase).await?;
        self.inner.init_db(ctx).await?;
        self.leave(Stage::InitDatabase);
        Ok(())
    }

    async fn init_keyring(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::InitKeyring).await?;
        self.inner.init_keyring(ctx).await?;
        self.leave(Stage::InitKeyring);
        Ok(())
    }

    async fn init_repositories(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::InitRepositories).await?;
        self.inner.init_repositories(ctx).await?;
        self.leave(Stage::InitRepositories);
        Ok(())
    }

    async fn init_world(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::InitWorld).await?;
        self.inner.init_world(ctx).await?;
        self.leave(Stage::InitWorld);
        Ok(())
    }

    async fn fixate_world(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::FixateWorld).await?;

        std::fs::write(ctx.path("lib/apk/db/installed"), INSTALLED)?;
        std::fs::create_dir_all(ctx.path("etc"))?;
        std::fs::write(ctx.path("etc/os-release"), "ID=alpine\n")?;

        let mut scripts = tar::Builder::new(Vec::new());
        let body = b"#!/bin/sh\nexit 0\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_mtime(1_234_567);
        header.set_uid(1000);
        scripts.append_data(&mut header, "busybox-1.36.1-r15.post-install", &body[..])?;
        std::fs::write(ctx.path("lib/apk/db/scripts.tar"), scripts.into_inner()?)?;

        if self.with_busybox {
            let busybox = ctx.path("bin/busybox");
            std::fs::create_dir_all(ctx.path("bin"))?;
            std::fs::write(&busybox, "busybox binary")?;
            std::fs::set_permissions(&busybox, std::fs::Permissions::from_mode(0o755))?;
        }

        self.leave(Stage::FixateWorld);
        Ok(())
    }
}

/// Account mutator that always fails.
pub struct FailingAccounts;

#[async_trait]
impl AccountMutator for FailingAccounts {
    async fn mutate_accounts(&self, _ctx: &BuildContext) -> Result<()> {
        anyhow::bail!("simulated passwd corruption")
    }
}

/// Execution boundary that records calls and emulates `busybox --install -s`.
#[derive(Default)]
pub struct FakeSandbox {
    pub exit_code: i32,
    pub calls: Mutex<Vec<(PathBuf, String, Vec<String>)>>,
}

impl FakeSandbox {
    pub fn failing(exit_code: i32) -> Self {
        Self {
            exit_code,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, String, Vec<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn execute(&self, root: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError> {
        self.calls.lock().push((
            root.to_path_buf(),
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));

        if self.exit_code != 0 {
            return Ok(ExecResult {
                exit_code: self.exit_code,
                stdout: Vec::new(),
                stderr: b"applet installation failed".to_vec(),
            });
        }

        if program == "/bin/busybox" {
            for applet in ["cat", "ls", "sh"] {
                let link = root.join("bin").join(applet);
                if std::fs::symlink_metadata(&link).is_err() {
                    std::os::unix::fs::symlink("/bin/busybox", &link).map_err(|source| ExecError::Spawn {
                        launcher: "fake".to_string(),
                        program: program.to_string(),
                        source,
                    })?;
                }
            }
        }

        Ok(ExecResult {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}
