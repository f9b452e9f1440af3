use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use rootforge::apk::ApkTools;
use rootforge::build::{parse_build_date, BuildContext, ImageBuilder, Stage, Toolchain};
use rootforge::config::ImageConfiguration;
use rootforge::error::{format_chain, BuildError};
use rootforge::export::build_image_tarball;
use rootforge::sandbox::{ChrootSandbox, ProotSandbox, Sandbox};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// rootforge - build reproducible apk-based OCI images without a daemon
#[derive(Parser)]
#[command(name = "rootforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image tarball from a YAML configuration
    Build(BuildArgs),

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Image configuration file
    config: PathBuf,

    /// Reference recorded in the image, e.g. `alpine-base:latest`
    image_ref: String,

    /// Output tarball
    output: PathBuf,

    /// Run workspace binaries through proot
    #[arg(long, conflicts_with = "use_chroot")]
    use_proot: bool,

    /// Run workspace binaries through chroot (requires privileges)
    #[arg(long)]
    use_chroot: bool,

    /// Timestamp for every file in the image: epoch seconds or RFC 3339
    #[arg(long, env = "SOURCE_DATE_EPOCH")]
    build_date: Option<String>,

    /// Write an SPDX SBOM to this file or directory
    #[arg(long, env = "ROOTFORGE_SBOM_PATH")]
    sbom_path: Option<PathBuf>,

    /// Target architecture (defaults to the first in the config, then the host)
    #[arg(long, env = "ROOTFORGE_ARCH")]
    arch: Option<String>,

    /// apk binary used for package resolution
    #[arg(long, env = "ROOTFORGE_APK", default_value = "apk")]
    apk: PathBuf,

    /// proot binary used with --use-proot
    #[arg(long, env = "ROOTFORGE_PROOT", default_value = "proot")]
    proot: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "rootforge", &mut std::io::stdout());
        }
        Commands::Build(args) => {
            if let Err(e) = rootforge::logging::init_logging(cli.log_json, cli.verbose) {
                eprintln!("{} failed to initialize logging: {}", "warning:".yellow().bold(), e);
            }

            let started = Instant::now();
            match cmd_build(&args).await {
                Ok(()) => {
                    eprintln!(
                        "{} wrote {} in {:.2}s",
                        "✔".green().bold(),
                        args.output.display(),
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    eprintln!("{} {}", "error:".red().bold(), format_chain(&e));
                    std::process::exit(1);
                }
            }
        }
    }
}

fn sandbox_for(args: &BuildArgs, arch: &str) -> Option<Arc<dyn Sandbox>> {
    if args.use_proot {
        Some(Arc::new(ProotSandbox::with_binary(args.proot.clone()).for_arch(arch)))
    } else if args.use_chroot {
        Some(Arc::new(ChrootSandbox::new()))
    } else {
        None
    }
}

fn config_dir(config: &Path) -> PathBuf {
    match config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn cmd_build(args: &BuildArgs) -> Result<(), BuildError> {
    let config = ImageConfiguration::load(&args.config)?;

    // Dropped on every return path, success or not.
    let workspace = tempfile::Builder::new()
        .prefix("rootforge-")
        .tempdir()
        .map_err(|e| Stage::InitDatabase.fail(anyhow::Error::new(e).context("failed to create workspace")))?;

    let mut ctx = BuildContext::new(workspace.path(), config).with_config_dir(config_dir(&args.config));
    if let Some(arch) = &args.arch {
        ctx = ctx.with_arch(arch.clone());
    }
    if let Some(date) = &args.build_date {
        ctx = ctx.with_build_date(parse_build_date(date)?);
    }
    ctx = ctx.with_sbom_path(args.sbom_path.clone());
    if let Some(sandbox) = sandbox_for(args, &ctx.arch) {
        ctx = ctx.with_sandbox(sandbox);
    }

    tracing::info!(
        config = %args.config.display(),
        image = %args.image_ref,
        arch = %ctx.arch,
        workspace = %workspace.path().display(),
        "building image"
    );

    let builder = ImageBuilder::with_toolchain(ctx, Toolchain::new(ApkTools::new(args.apk.clone())));
    builder.build_image().await?;

    let ctx = builder.context().clone();
    let image_ref = args.image_ref.clone();
    let output = args.output.clone();
    tokio::task::spawn_blocking(move || build_image_tarball(&ctx, &image_ref, &output))
        .await
        .map_err(|e| Stage::Assemble.fail(anyhow::Error::new(e)))?
        .map_err(|e| Stage::Assemble.fail(e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_args() {
        let cli = Cli::try_parse_from([
            "rootforge",
            "build",
            "--use-proot",
            "--arch",
            "aarch64",
            "image.yaml",
            "demo:1",
            "out.tar",
        ])
        .unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert!(args.use_proot);
        assert_eq!(args.arch.as_deref(), Some("aarch64"));
        assert_eq!(config_dir(&args.config), PathBuf::from("."));
        assert!(sandbox_for(&args, "aarch64").is_some());
    }

    #[test]
    fn test_proot_and_chroot_conflict() {
        let res = Cli::try_parse_from(["rootforge", "build", "--use-proot", "--use-chroot", "a.yaml", "x", "y.tar"]);
        assert!(res.is_err());
    }
}
