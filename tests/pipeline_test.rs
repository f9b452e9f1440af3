mod common;

use common::{config, FailingAccounts, FakeApk, FakeSandbox, RecordingObserver};
use rootforge::build::{parse_build_date, BuildContext, ImageBuilder, Phase, Stage, Toolchain};
use rootforge::config::ImageConfiguration;
use rootforge::error::{format_chain, BuildError};
use rootforge::observer::BuildEvent;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn builder(
    workdir: &std::path::Path,
    config: ImageConfiguration,
    apk: Arc<FakeApk>,
    observer: Arc<RecordingObserver>,
) -> (BuildContext, Toolchain) {
    let ctx = BuildContext::new(workdir, config)
        .with_build_date(parse_build_date("0").unwrap())
        .with_observer(observer);
    let toolchain = Toolchain::default().with_packages(apk);
    (ctx, toolchain)
}

#[tokio::test]
async fn test_phases_run_in_order() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(FakeApk::new());
    let observer = Arc::new(RecordingObserver::default());
    let sandbox = Arc::new(FakeSandbox::default());

    let (ctx, toolchain) = builder(dir.path(), config(), apk.clone(), observer.clone());
    let ctx = ctx.with_sandbox(sandbox.clone());
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    let phases: Vec<Phase> = observer
        .events()
        .iter()
        .filter_map(|e| match e {
            BuildEvent::PhaseCompleted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::Validate,
            Phase::InitDatabase,
            Phase::InitPackageState,
            Phase::Fixate,
            Phase::Finalize,
            Phase::InstallSymlinks,
            Phase::SupervisionTree,
        ]
    );

    // Every package-state stage finished before fixation started.
    let log = apk.log.lock().clone();
    let fixate_start = log
        .iter()
        .position(|entry| *entry == (Stage::FixateWorld, "start"))
        .unwrap();
    for stage in [Stage::InitDatabase, Stage::InitKeyring, Stage::InitRepositories, Stage::InitWorld] {
        let end = log.iter().position(|entry| *entry == (stage, "end")).unwrap();
        assert!(end < fixate_start, "{} ended after fixation started", stage);
    }

    let events = observer.events();
    assert!(matches!(events.first(), Some(BuildEvent::PhaseStarted { phase: Phase::Validate, .. })));
    assert!(matches!(events.last(), Some(BuildEvent::BuildCompleted { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        BuildEvent::StageSkipped {
            stage: Stage::GenerateSbom,
            ..
        }
    )));
}

#[tokio::test]
async fn test_failed_stage_lets_siblings_finish_then_stops() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(
        FakeApk::new()
            .failing_on(Stage::InitKeyring)
            .with_delay(Duration::from_millis(50)),
    );
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), apk.clone(), observer.clone());
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BuildError::PackageStateInit {
            stage: Stage::InitKeyring,
            ..
        }
    ));
    let chain = format_chain(&err);
    assert!(chain.starts_with("failed to initialize apk keyring"), "{}", chain);
    assert!(chain.contains("simulated"), "{}", chain);

    let finished = apk.finished();
    assert!(finished.contains(&Stage::InitRepositories));
    assert!(finished.contains(&Stage::InitWorld));
    assert!(dir.path().join("etc/apk/world").is_file());
    assert!(dir.path().join("etc/apk/repositories").is_file());

    assert!(!observer.started().contains(&Stage::FixateWorld));
    assert!(!observer
        .events()
        .iter()
        .any(|e| matches!(e, BuildEvent::BuildCompleted { .. })));
    assert!(observer.events().iter().any(|e| matches!(
        e,
        BuildEvent::PhaseFailed {
            phase: Phase::InitPackageState,
            failed_stages,
        } if failed_stages == &vec![Stage::InitKeyring]
    )));
}

#[tokio::test]
async fn test_first_error_in_stage_order_wins() {
    let dir = tempdir().unwrap();
    // InitWorld fails well before InitKeyring does.
    let apk = Arc::new(
        FakeApk::new()
            .failing_on(Stage::InitKeyring)
            .failing_on(Stage::InitWorld)
            .delaying(Stage::InitKeyring, Duration::from_millis(100))
            .delaying(Stage::InitWorld, Duration::from_millis(5)),
    );
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), apk.clone(), observer.clone());
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::InitKeyring);
    assert_eq!(err.kind(), "package-state-init");
    assert!(apk.finished().contains(&Stage::InitRepositories));
    assert!(observer.events().iter().any(|e| matches!(
        e,
        BuildEvent::PhaseFailed {
            phase: Phase::InitPackageState,
            failed_stages,
        } if failed_stages == &vec![Stage::InitKeyring, Stage::InitWorld]
    )));
}

#[tokio::test]
async fn test_finalize_failure_still_normalizes_scripts() {
    let dir = tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), Arc::new(FakeApk::new()), observer.clone());
    let toolchain = toolchain.with_accounts(Arc::new(FailingAccounts));
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::MutateAccounts);
    assert_eq!(err.kind(), "account-mutation");
    assert!(format_chain(&err).contains("simulated passwd corruption"));

    assert!(observer.completed().contains(&Stage::NormalizeScripts));
    assert!(observer.events().iter().any(|e| matches!(
        e,
        BuildEvent::PhaseFailed {
            phase: Phase::Finalize,
            failed_stages,
        } if failed_stages == &vec![Stage::MutateAccounts]
    )));

    let mut scripts = tar::Archive::new(fs::File::open(dir.path().join("lib/apk/db/scripts.tar")).unwrap());
    for entry in scripts.entries().unwrap() {
        let entry = entry.unwrap();
        assert_eq!(entry.header().mtime().unwrap(), 0);
        assert_eq!(entry.header().uid().unwrap(), 0);
    }
    assert!(!observer.started().contains(&Stage::WriteSupervisionTree));
}

#[tokio::test]
async fn test_panicking_stage_is_a_stage_error() {
    let dir = tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let apk = Arc::new(FakeApk::new().panicking_on(Stage::FixateWorld));

    let (ctx, toolchain) = builder(dir.path(), config(), apk, observer.clone());
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BuildError::Fixation {
            stage: Stage::FixateWorld,
            ..
        }
    ));
    let chain = format_chain(&err);
    assert!(chain.contains("resolver bug"), "{}", chain);
    assert!(observer.events().iter().any(|e| matches!(
        e,
        BuildEvent::StageFailed {
            stage: Stage::FixateWorld,
            ..
        }
    )));
}

#[tokio::test]
async fn test_fixation_failure_stops_before_accounts() {
    let dir = tempdir().unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let apk = Arc::new(FakeApk::new().failing_on(Stage::FixateWorld));

    let (ctx, toolchain) = builder(dir.path(), config(), apk, observer);
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::FixateWorld);
    assert_eq!(err.kind(), "fixation");
    assert!(!dir.path().join("etc/passwd").exists());
}

#[tokio::test]
async fn test_missing_busybox_never_touches_boundary() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(FakeApk::new().without_busybox());
    let observer = Arc::new(RecordingObserver::default());
    let sandbox = Arc::new(FakeSandbox::failing(1));

    let (ctx, toolchain) = builder(dir.path(), config(), apk, observer.clone());
    let ctx = ctx.with_sandbox(sandbox.clone());
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    assert!(sandbox.calls().is_empty());
    assert!(observer.completed().contains(&Stage::InstallSymlinks));
}

#[tokio::test]
async fn test_symlink_stage_skipped_without_boundary() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(FakeApk::new());
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), apk, observer.clone());
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    assert!(observer.events().iter().any(|e| matches!(
        e,
        BuildEvent::StageSkipped {
            stage: Stage::InstallSymlinks,
            ..
        }
    )));
    assert!(!dir.path().join("bin/sh").exists());
}

#[tokio::test]
async fn test_boundary_failure_is_execution_error() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(FakeApk::new());
    let observer = Arc::new(RecordingObserver::default());
    let sandbox = Arc::new(FakeSandbox::failing(2));

    let (ctx, toolchain) = builder(dir.path(), config(), apk, observer);
    let ctx = ctx.with_sandbox(sandbox.clone());
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Execution { .. }));
    let chain = format_chain(&err);
    assert!(chain.contains("applet installation failed"), "{}", chain);
    assert_eq!(sandbox.calls().len(), 1);
}

#[tokio::test]
async fn test_sbom_only_with_path() {
    let dir = tempdir().unwrap();
    let out = tempdir().unwrap();
    let sbom = out.path().join("image.spdx.json");
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), Arc::new(FakeApk::new()), observer.clone());
    let ctx = ctx.with_sbom_path(Some(sbom.clone()));
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&sbom).unwrap()).unwrap();
    assert_eq!(doc["spdxVersion"], "SPDX-2.2");
    assert_eq!(doc["packages"].as_array().unwrap().len(), 2);
    assert!(observer.completed().contains(&Stage::GenerateSbom));
    assert!(!dir.path().join("image.spdx.json").exists());
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_mutation() {
    let dir = tempdir().unwrap();
    let apk = Arc::new(FakeApk::new());
    let mut config = config();
    config.accounts.run_as = Some("ghost".to_string());

    let (ctx, toolchain) = builder(dir.path(), config, apk.clone(), Arc::new(RecordingObserver::default()));
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Configuration(_)));
    assert!(apk.log.lock().is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_escaping_home_is_rejected_before_mutation() {
    let outer = tempdir().unwrap();
    let workdir = outer.path().join("ws");
    fs::create_dir(&workdir).unwrap();

    let mut config = config();
    config.accounts.users[0].home = Some("/home/../../escaped".to_string());
    config.accounts.users[0].shell = Some("/bin/sh\nroot2:x:0:0::/:/bin/sh".to_string());

    let (ctx, toolchain) = builder(&workdir, config, Arc::new(FakeApk::new()), Arc::new(RecordingObserver::default()));
    let err = ImageBuilder::with_toolchain(ctx, toolchain)
        .build_image()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Configuration(_)));
    assert!(format_chain(&err).contains("escaped"));
    assert_eq!(fs::read_dir(&workdir).unwrap().count(), 0);
    assert!(!outer.path().join("escaped").exists());
}

#[tokio::test]
async fn test_end_to_end_busybox_image() {
    let dir = tempdir().unwrap();
    let sandbox = Arc::new(FakeSandbox::default());
    let observer = Arc::new(RecordingObserver::default());

    let (ctx, toolchain) = builder(dir.path(), config(), Arc::new(FakeApk::new()), observer);
    let ctx = ctx.with_sandbox(sandbox.clone());
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    let calls = sandbox.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, dir.path());
    assert_eq!(calls[0].1, "/bin/busybox");
    assert_eq!(calls[0].2, vec!["--install", "-s"]);

    let sh = fs::read_link(dir.path().join("bin/sh")).unwrap();
    assert_eq!(sh, std::path::Path::new("/bin/busybox"));

    let world = fs::read_to_string(dir.path().join("etc/apk/world")).unwrap();
    assert_eq!(world, "alpine-baselayout\nbusybox\n");

    let passwd = fs::read_to_string(dir.path().join("etc/passwd")).unwrap();
    assert!(passwd.starts_with("root:x:0:0:"));
    assert!(passwd.contains("nonroot:x:65532:65532:"));
    assert!(dir.path().join("home/nonroot").is_dir());

    // Files and directories written by the pipeline carry the build date.
    for rel in [
        "etc/passwd",
        "etc/group",
        "lib/apk/db/scripts.tar",
        "lib/apk/db/lock",
        "lib/apk/db/triggers",
        "etc/apk/world",
        "etc/apk/repositories",
        "etc/apk/arch",
        "etc/apk/keys",
        "var/cache/apk",
        "home",
        "home/nonroot",
    ] {
        let meta = fs::metadata(dir.path().join(rel)).unwrap();
        assert_eq!(meta.mtime(), 0, "{} has a non-zero mtime", rel);
    }

    let mut scripts = tar::Archive::new(fs::File::open(dir.path().join("lib/apk/db/scripts.tar")).unwrap());
    for entry in scripts.entries().unwrap() {
        let entry = entry.unwrap();
        assert_eq!(entry.header().mtime().unwrap(), 0);
        assert_eq!(entry.header().uid().unwrap(), 0);
    }
}

#[tokio::test]
async fn test_busybox_only_has_default_accounts() {
    let dir = tempdir().unwrap();
    let sandbox = Arc::new(FakeSandbox::default());
    let config = ImageConfiguration::from_yaml_str("contents:\n  packages: [busybox]\n").unwrap();

    let (ctx, toolchain) = builder(
        dir.path(),
        config,
        Arc::new(FakeApk::new()),
        Arc::new(RecordingObserver::default()),
    );
    let ctx = ctx.with_sandbox(sandbox);
    ImageBuilder::with_toolchain(ctx, toolchain).build_image().await.unwrap();

    assert!(dir.path().join("bin/busybox").is_file());
    assert!(fs::symlink_metadata(dir.path().join("bin/sh")).unwrap().file_type().is_symlink());

    let passwd = fs::read_to_string(dir.path().join("etc/passwd")).unwrap();
    assert_eq!(passwd.lines().count(), 1);
    assert!(passwd.starts_with("root:x:0:0:"));
    assert!(!dir.path().join("home").exists());
}
