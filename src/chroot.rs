//! Build environment (chroot) lifecycle and command execution.
//!
//! The driver only talks to the `ChrootOps` trait; `LocalChroot` is the
//! shell-out implementation used by the CLI. Environments are plain
//! directory trees under the work dir (`chroot_native`,
//! `chroot_buildroot_<arch>`), entered via sudo + chroot.
//!
//! Concurrent invocations of crossforge against the same work directory are
//! not coordinated here; see `envlock` for the in-process guard.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::arch::Suffix;
use crate::config::Config;
use crate::process::{shell_join, Cmd};

/// Operations the build driver needs from an environment.
pub trait ChrootOps {
    /// Ensure the environment exists and is initialized. Idempotent.
    fn init(&self, suffix: &Suffix) -> Result<()>;

    /// Install packages into the environment. `build_deps` distinguishes
    /// build-time dependency installation from plain tool installation.
    fn install(&self, packages: &[String], suffix: &Suffix, build_deps: bool) -> Result<()>;

    /// Run a command as the build user inside the environment.
    fn run_user(&self, cmd: &[String], suffix: &Suffix, workdir: &str) -> Result<()>;

    /// Run a command as root inside the environment.
    fn run_root(&self, cmd: &[String], suffix: &Suffix) -> Result<()>;

    /// Bind-mount a host path onto a target host path.
    fn bind(&self, host_path: &Path, target_path: &Path) -> Result<()>;

    /// Release a bind mount created by `bind`.
    fn unbind(&self, target_path: &Path) -> Result<()>;

    /// Copy a package's build files into the environment's build workdir.
    fn copy_build_files(&self, source: &Path, suffix: &Suffix) -> Result<()>;

    /// Write the builder's configuration (jobs, packager) into the
    /// environment.
    fn configure_builder(&self, suffix: &Suffix) -> Result<()>;

    /// Write a file at an environment-relative path.
    fn write_file(&self, suffix: &Suffix, path: &str, content: &str) -> Result<()>;
}

/// Shell-out implementation operating on directory trees under the work dir.
pub struct LocalChroot<'a> {
    config: &'a Config,
}

impl<'a> LocalChroot<'a> {
    pub fn new(config: &'a Config) -> Self {
        LocalChroot { config }
    }

    fn dir(&self, suffix: &Suffix) -> PathBuf {
        self.config.chroot_dir(suffix)
    }
}

/// Compose the apk invocation for installing packages. Build-time
/// dependencies go into a named virtual group so they can be removed again
/// as a unit; plain tool installs stay permanent.
fn install_cmd(packages: &[String], build_deps: bool) -> Vec<String> {
    let mut cmd = vec!["apk".to_string(), "add".to_string()];
    if build_deps {
        cmd.push("-t".to_string());
        cmd.push(".crossforge-makedepends".to_string());
    }
    cmd.extend(packages.iter().cloned());
    cmd
}

/// Compose the host-side argv for running a command as root inside a chroot.
fn root_cmd(dir: &Path, chroot_path: &str, cmd: &[String]) -> Vec<String> {
    let mut argv = vec![
        "chroot".to_string(),
        dir.to_string_lossy().into_owned(),
        "/usr/bin/env".to_string(),
        format!("PATH={chroot_path}"),
    ];
    argv.extend(cmd.iter().cloned());
    argv
}

/// Compose the host-side argv for running a command as the build user inside
/// a chroot, in a given working directory.
fn user_cmd(dir: &Path, chroot_path: &str, cmd: &[String], workdir: &str) -> Vec<String> {
    let inner = format!("cd {} && {}", workdir, shell_join(cmd));
    vec![
        "chroot".to_string(),
        dir.to_string_lossy().into_owned(),
        "/usr/bin/env".to_string(),
        format!("PATH={chroot_path}"),
        "su".to_string(),
        "user".to_string(),
        "-c".to_string(),
        inner,
    ]
}

impl LocalChroot<'_> {
    /// Keep the host packages root mounted at the builder's publish
    /// directory, so artifacts land directly in the host-side namespaces.
    /// Mounts do not survive a reboot, so this is re-checked on every init.
    fn mount_packages(&self, suffix: &Suffix) -> Result<()> {
        let target = self.dir(suffix).join("home/user/packages");
        let mounted = Cmd::new("mountpoint")
            .args(["-q"])
            .arg_path(&target)
            .allow_fail()
            .run()?;
        if mounted.success() {
            return Ok(());
        }
        let packages = self.config.packages_root();
        fs::create_dir_all(&packages)
            .with_context(|| format!("failed to create {}", packages.display()))?;
        self.bind(&packages, &target)
    }
}

impl ChrootOps for LocalChroot<'_> {
    fn init(&self, suffix: &Suffix) -> Result<()> {
        let dir = self.dir(suffix);
        if dir.join("bin/sh").exists() {
            debug!("({suffix}) environment already initialized");
            return self.mount_packages(suffix);
        }
        info!("({suffix}) initialize build environment");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Cmd::new("apk.static")
            .args(["--root"])
            .arg_path(&dir)
            .args(["--initdb", "-U", "--allow-untrusted", "add", "alpine-base", "build-base"])
            .sudo()
            .error_msg(format!("initializing environment '{suffix}' failed"))
            .run()?;
        self.run_root(
            &["adduser".into(), "-D".into(), "user".into()],
            suffix,
        )?;
        self.mount_packages(suffix)
    }

    fn install(&self, packages: &[String], suffix: &Suffix, build_deps: bool) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        debug!(
            "({suffix}) install {} (build_deps={build_deps})",
            packages.join(", ")
        );
        self.run_root(&install_cmd(packages, build_deps), suffix)
    }

    fn run_user(&self, cmd: &[String], suffix: &Suffix, workdir: &str) -> Result<()> {
        let argv = user_cmd(&self.dir(suffix), &self.config.chroot_path, cmd, workdir);
        Cmd::new("sudo").args(&argv).run_interactive()?;
        Ok(())
    }

    fn run_root(&self, cmd: &[String], suffix: &Suffix) -> Result<()> {
        let argv = root_cmd(&self.dir(suffix), &self.config.chroot_path, cmd);
        Cmd::new("sudo").args(&argv).run()?;
        Ok(())
    }

    fn bind(&self, host_path: &Path, target_path: &Path) -> Result<()> {
        debug!(
            "bind mount {} -> {}",
            host_path.display(),
            target_path.display()
        );
        Cmd::new("mkdir")
            .args(["-p"])
            .arg_path(target_path)
            .sudo()
            .run()?;
        Cmd::new("mount")
            .args(["--bind"])
            .arg_path(host_path)
            .arg_path(target_path)
            .sudo()
            .error_msg(format!("bind mount of {} failed", host_path.display()))
            .run()?;
        Ok(())
    }

    fn unbind(&self, target_path: &Path) -> Result<()> {
        debug!("unmount {}", target_path.display());
        Cmd::new("umount")
            .arg_path(target_path)
            .sudo()
            .error_msg(format!("unmount of {} failed", target_path.display()))
            .run()?;
        Ok(())
    }

    fn copy_build_files(&self, source: &Path, suffix: &Suffix) -> Result<()> {
        let build_dir = self
            .dir(suffix)
            .join(self.config.build_path.trim_start_matches('/'));
        for entry in WalkDir::new(source) {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .expect("walkdir yields paths under its root");
            if rel.as_os_str().is_empty() {
                continue;
            }
            let dest = build_dir.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &dest).with_context(|| {
                    format!("failed to copy {} to build path", entry.path().display())
                })?;
            }
        }
        self.run_root(
            &[
                "chown".into(),
                "-R".into(),
                "user:user".into(),
                self.config.build_path.clone(),
            ],
            suffix,
        )
    }

    fn configure_builder(&self, suffix: &Suffix) -> Result<()> {
        let conf = format!(
            "export JOBS={jobs}\nexport MAKEFLAGS=-j$JOBS\nREPODEST=/home/user/packages\n",
            jobs = self.config.jobs
        );
        self.write_file(suffix, &format!("etc/{}.conf", self.config.builder), &conf)
    }

    fn write_file(&self, suffix: &Suffix, path: &str, content: &str) -> Result<()> {
        let dest = self.dir(suffix).join(path.trim_start_matches('/'));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, content)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}

/// Scoped bind mount: releases the mount when dropped, so an error unwind
/// in the middle of a build never leaves mounts dangling.
pub struct BindMount<'a> {
    chroot: &'a dyn ChrootOps,
    target: PathBuf,
}

impl<'a> BindMount<'a> {
    pub fn new(chroot: &'a dyn ChrootOps, host: &Path, target: &Path) -> Result<Self> {
        chroot.bind(host, target)?;
        Ok(BindMount {
            chroot,
            target: target.to_path_buf(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for BindMount<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.chroot.unbind(&self.target) {
            warn!("failed to release bind mount {}: {err:#}", self.target.display());
        }
    }
}
