//! crossforge - cross-compilation build orchestrator.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crossforge::arch::Arch;
use crossforge::build::Driver;
use crossforge::chroot::LocalChroot;
use crossforge::config::Config;
use crossforge::distccd::LocalDistccd;
use crossforge::error::BuildError;
use crossforge::package::BuildOptions;
use crossforge::preflight;
use crossforge::repo::LocalRepo;
use crossforge::vm::{self, VmOptions};

#[derive(Parser)]
#[command(name = "crossforge")]
#[command(about = "Cross-compilation build orchestrator")]
#[command(
    after_help = "QUICK START:\n  crossforge preflight        Check host dependencies\n  crossforge build hello      Build a package for the native arch\n  crossforge build hello --arch aarch64\n  crossforge run image.img --arch aarch64\n  crossforge config           Show the effective configuration"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package (and its build-time dependencies) if necessary
    Build {
        /// Package name
        pkgname: String,

        /// Target architecture (default: let the resolver pick)
        #[arg(long)]
        arch: Option<Arch>,

        /// Build even if the artifact is up to date
        #[arg(short, long)]
        force: bool,

        /// Build dependencies recursively instead of installing them,
        /// and uninstall them afterwards
        #[arg(long)]
        strict: bool,

        /// Write a build record next to the artifact
        #[arg(long)]
        buildinfo: bool,
    },

    /// Boot a built system image in qemu
    Run {
        /// Disk image to boot
        image: PathBuf,

        /// Guest architecture
        #[arg(long, default_value = "x86_64")]
        arch: Arch,

        /// Kernel to boot directly (optional)
        #[arg(long)]
        kernel: Option<PathBuf>,

        /// Initramfs for direct kernel boot
        #[arg(long)]
        initramfs: Option<PathBuf>,

        /// Kernel command line
        #[arg(long, default_value = "")]
        cmdline: String,

        /// Guest memory in MiB
        #[arg(short, long, default_value = "1024")]
        memory: u32,

        /// Host port forwarded to the guest's SSH port
        #[arg(long, default_value = "2222")]
        ssh_port: u16,
    },

    /// Check host dependencies before building
    Preflight {
        /// Fail with an error if a required tool is missing
        #[arg(long)]
        strict: bool,
    },

    /// Show the effective configuration
    Config,
}

fn main() -> Result<()> {
    // .env first, then real environment wins inside Config::load.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Build {
            pkgname,
            arch,
            force,
            strict,
            buildinfo,
        } => {
            let repo = LocalRepo::new(&config);
            let chroot = LocalChroot::new(&config);
            let distccd = LocalDistccd::new(&chroot);
            let mut driver = Driver::new(&config, &repo, &chroot, &distccd);
            let opts = BuildOptions {
                force,
                strict,
                buildinfo,
            };
            match driver.build(&pkgname, arch.as_ref(), opts)? {
                Some(relative) => {
                    println!("{}", config.packages_root().join(relative).display())
                }
                None => println!("{pkgname}: nothing to do"),
            }
            Ok(())
        }

        Commands::Run {
            image,
            arch,
            kernel,
            initramfs,
            cmdline,
            memory,
            ssh_port,
        } => vm::run(&VmOptions {
            arch,
            image,
            kernel,
            initramfs,
            cmdline,
            memory_mb: memory,
            ssh_port,
        }),

        Commands::Preflight { strict } => {
            let report = preflight::run(&config);
            report.print();
            if strict {
                if let Some(missing) = report.first_missing_required() {
                    return Err(BuildError::ToolNotAvailable(missing.to_string()).into());
                }
            }
            Ok(())
        }

        Commands::Config => {
            config.print();
            Ok(())
        }
    }
}
