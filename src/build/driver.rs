//! Recursive dependency build driver.
//!
//! One `Driver` handles one top-level build request and every build it
//! triggers recursively. The phases per package are: locate, resolve the
//! environment, skip if current, prepare environments, resolve dependencies
//! (recursing), install the cross toolchain, re-check necessity, stage
//! sources, invoke the builder, verify and publish the artifact, clean up.
//!
//! Skips are not errors: a package that is already current, only exists as
//! a binary in an index, or is re-entered through a dependency cycle yields
//! `Ok(None)`. Any `Err` aborts the whole call tree.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::arch::{Arch, Suffix};
use crate::build::autodetect::{self, CrossMode, ResolvedEnvironment};
use crate::build::{buildinfo, crosstool};
use crate::chroot::{BindMount, ChrootOps};
use crate::config::Config;
use crate::distccd::DistccDaemon;
use crate::envlock;
use crate::error::BuildError;
use crate::package::{BuildOptions, PackageDefinition};
use crate::repo::PackageRepo;

pub struct Driver<'a> {
    config: &'a Config,
    repo: &'a dyn PackageRepo,
    chroot: &'a dyn ChrootOps,
    distccd: &'a dyn DistccDaemon,
    /// Packages currently being built higher in the call tree; re-entry is
    /// a skip, which tolerates dependency cycles.
    in_progress: Vec<String>,
}

/// Options for a recursive dependency edge: force never propagates past the
/// explicitly requested package.
fn dep_opts(opts: BuildOptions) -> BuildOptions {
    BuildOptions {
        force: false,
        ..opts
    }
}

/// Split makedepends into (build-machine, target) halves. Only a
/// dual-sysroot build with a declared split separates them; everything else
/// treats the whole list as target dependencies.
fn partition_makedepends(
    pkg: &PackageDefinition,
    env: &ResolvedEnvironment,
) -> (Vec<String>, Vec<String>) {
    if env.dual_sysroot && pkg.has_split_makedepends() {
        (pkg.makedepends_build.clone(), pkg.makedepends_host.clone())
    } else {
        (Vec::new(), pkg.makedepends.clone())
    }
}

/// Cross toolchain packages installed into the native environment for a
/// native-cross build.
fn cross_packages(carch: &Arch) -> Vec<String> {
    vec![
        format!("gcc-{carch}"),
        format!("g++-{carch}"),
        "ccache-cross-symlinks".to_string(),
    ]
}

/// Assemble the builder invocation: environment variable assignments for the
/// resolved cross mode, then the builder and its flags.
fn builder_cmd(
    config: &Config,
    env: &ResolvedEnvironment,
    opts: BuildOptions,
    extra_paths: &[String],
) -> Result<Vec<String>> {
    let mut cmd = vec![format!("CARCH={}", env.carch)];
    match env.cross {
        CrossMode::None => {}
        CrossMode::Native => {
            let hostspec = env.carch.hostspec().with_context(|| {
                format!("no cross toolchain triplet known for '{}'", env.carch)
            })?;
            cmd.push(format!("CROSS_COMPILE={hostspec}-"));
            cmd.push(format!("CC={hostspec}-gcc"));
            if env.dual_sysroot {
                // Compiler, linker and pkg-config must all resolve against
                // the mounted foreign tree, not the native root.
                let sysroot = config.cross_sysroot(&env.carch);
                cmd.push(format!("CBUILDROOT={sysroot}"));
                cmd.push(format!("CHOST={hostspec}"));
                cmd.push(format!("CROSS_CFLAGS=--sysroot={sysroot}"));
                cmd.push(format!("CPPFLAGS=--sysroot={sysroot}"));
                cmd.push(format!("LDFLAGS=--sysroot={sysroot} -L{sysroot}/lib"));
                cmd.push(format!(
                    "PKG_CONFIG_PATH={sysroot}/usr/lib/pkgconfig/:{sysroot}/usr/share/pkgconfig"
                ));
                cmd.push(format!("PKG_CONFIG_SYSROOT_DIR={sysroot}"));
            }
            if !extra_paths.is_empty() {
                cmd.push(format!(
                    "PATH={}:{}",
                    extra_paths.join(":"),
                    config.chroot_path
                ));
            }
        }
        CrossMode::Distcc => {
            cmd.push(format!("PATH=/usr/lib/distcc/bin:{}", config.chroot_path));
            cmd.push(format!("DISTCC_HOSTS=127.0.0.1:{}", config.distccd_port));
        }
    }
    cmd.push(config.builder.clone());
    // Strict: dependencies were built into the repository, let the builder
    // install them from there. Non-strict: they are already installed.
    cmd.push(if opts.strict { "-r" } else { "-d" }.to_string());
    if opts.force {
        cmd.push("-f".to_string());
    }
    Ok(cmd)
}

/// Bind mounts released strictly last-mounted-first, also on unwind.
struct MountStack<'a>(Vec<BindMount<'a>>);

impl Drop for MountStack<'_> {
    fn drop(&mut self) {
        while self.0.pop().is_some() {}
    }
}

impl<'a> Driver<'a> {
    pub fn new(
        config: &'a Config,
        repo: &'a dyn PackageRepo,
        chroot: &'a dyn ChrootOps,
        distccd: &'a dyn DistccDaemon,
    ) -> Self {
        Driver {
            config,
            repo,
            chroot,
            distccd,
            in_progress: Vec::new(),
        }
    }

    /// Build `pkgname` for `arch` (or let the resolver pick) if necessary.
    ///
    /// Returns the artifact path relative to the packages root, or `None`
    /// when the build was skipped.
    pub fn build(
        &mut self,
        pkgname: &str,
        arch: Option<&Arch>,
        opts: BuildOptions,
    ) -> Result<Option<String>> {
        if self.in_progress.iter().any(|n| n == pkgname) {
            debug!("{pkgname}: already building higher in the call tree, skipping");
            return Ok(None);
        }
        self.in_progress.push(pkgname.to_string());
        let result = self.build_inner(pkgname, arch, opts);
        self.in_progress.pop();
        result
    }

    fn build_inner(
        &mut self,
        pkgname: &str,
        arch: Option<&Arch>,
        opts: BuildOptions,
    ) -> Result<Option<String>> {
        // Locate the build definition. A binary-only package in an index is
        // a valid skip; a package nowhere at all is fatal.
        let Some(pkg) = self.repo.find(pkgname)? else {
            let arch_query = arch.unwrap_or(&self.config.arch_native);
            if self.repo.in_any_index(pkgname, arch_query)? {
                debug!("{pkgname}: binary-only package, nothing to build");
                return Ok(None);
            }
            return Err(BuildError::PackageNotFound(pkgname.to_string()).into());
        };

        let env = autodetect::resolve(self.config, &pkg, arch, opts.strict)?;

        if !opts.force && !self.repo.is_necessary(&env.carch, &pkg)? {
            return Ok(None);
        }

        info!(
            "({}) build {} for {}",
            env.suffix,
            pkg.output_name(&self.config.pkg_ext),
            env.carch
        );

        self.prepare_environments(&env)?;
        self.resolve_dependencies(&pkg, &env, opts)?;
        let extra_paths = self.install_toolchain(&pkg, &env)?;

        // A dependency build may have produced this package on the way (a
        // sibling artifact of a shared definition); check again.
        if !opts.force && !self.repo.is_necessary(&env.carch, &pkg)? {
            debug!(
                "{}: became unnecessary while resolving dependencies",
                pkg.pkgname
            );
            return Ok(None);
        }

        {
            let _guard = envlock::lock(&env.suffix);
            self.chroot.configure_builder(&env.suffix)?;
            self.chroot.copy_build_files(&pkg.dir, &env.suffix)?;
        }

        if env.dual_sysroot {
            warn!(
                "({}) {}: cross compiling natively against a mounted foreign \
                 sysroot; expect breakage with build systems that probe the host",
                env.suffix, pkg.pkgname
            );
        }

        let mounts = self.mount_sysroot(&env)?;
        let cmd = builder_cmd(self.config, &env, opts, &extra_paths)?;
        {
            let _guard = envlock::lock(&env.suffix);
            self.chroot
                .run_user(&cmd, &env.suffix, &self.config.build_path)?;
        }
        drop(mounts);

        let relative = format!(
            "{}/{}",
            env.suffix,
            pkg.output_name(&self.config.pkg_ext)
        );
        let artifact = self.config.packages_root().join(&relative);
        // A clean builder exit is not trusted on its own.
        if artifact.symlink_metadata().is_err() {
            return Err(BuildError::BuildArtifactMissing(artifact).into());
        }

        if opts.buildinfo {
            buildinfo::write(&pkg, &env, &artifact)?;
        }
        if pkg.is_noarch() {
            self.symlink_noarch(&pkg, &env)?;
        }
        self.clear_index(&env.suffix)?;

        if opts.strict {
            let _guard = envlock::lock(&env.suffix);
            self.chroot.run_user(
                &[self.config.builder.clone(), "undeps".to_string()],
                &env.suffix,
                &self.config.build_path,
            )?;
        }

        info!("({}) finished {relative}", env.suffix);
        Ok(Some(relative))
    }

    fn prepare_environments(&self, env: &ResolvedEnvironment) -> Result<()> {
        {
            let _guard = envlock::lock(&Suffix::Native);
            self.chroot.init(&Suffix::Native)?;
        }
        if !env.suffix.is_native() {
            let _guard = envlock::lock(&env.suffix);
            self.chroot.init(&env.suffix)?;
        }
        if env.dual_sysroot {
            // The foreign buildroot backs the mounted sysroot.
            let foreign = Suffix::buildroot(env.carch.clone());
            let _guard = envlock::lock(&foreign);
            self.chroot.init(&foreign)?;
        }
        Ok(())
    }

    /// Strict: recursively build every makedepend. Non-strict: assume they
    /// are already built and install them into the environments that need
    /// them instead.
    fn resolve_dependencies(
        &mut self,
        pkg: &PackageDefinition,
        env: &ResolvedEnvironment,
        opts: BuildOptions,
    ) -> Result<()> {
        let (build_deps, host_deps) = partition_makedepends(pkg, env);

        if opts.strict {
            // Build each dependency instead of installing it; the builder
            // installs them from the repository and `undeps` removes them
            // afterwards.
            let native = self.config.arch_native.clone();
            for dep in &build_deps {
                self.build(dep, Some(&native), dep_opts(opts))?;
            }
            for dep in &host_deps {
                self.build(dep, Some(&env.carch), dep_opts(opts))?;
            }
            return Ok(());
        }

        if !build_deps.is_empty() {
            let _guard = envlock::lock(&Suffix::Native);
            self.chroot.install(&build_deps, &Suffix::Native, true)?;
        }
        if !host_deps.is_empty() {
            let target = if env.dual_sysroot {
                Suffix::buildroot(env.carch.clone())
            } else {
                env.suffix.clone()
            };
            let _guard = envlock::lock(&target);
            self.chroot.install(&host_deps, &target, true)?;
        }
        Ok(())
    }

    /// Install whatever the resolved cross mode needs. Returns PATH entries
    /// to prepend to the builder invocation.
    fn install_toolchain(
        &self,
        pkg: &PackageDefinition,
        env: &ResolvedEnvironment,
    ) -> Result<Vec<String>> {
        let mut extra_paths = Vec::new();
        if env.cross != CrossMode::None {
            // Both cross modes compile on the native side: directly for
            // native cross, via distccd for distcc.
            let _guard = envlock::lock(&Suffix::Native);
            self.chroot
                .install(&cross_packages(&env.carch), &Suffix::Native, false)?;
        }
        match env.cross {
            CrossMode::None => {}
            CrossMode::Native => {
                if env.dual_sysroot {
                    if let Some(dir) =
                        crosstool::install(self.chroot, self.config, pkg, &env.carch)?
                    {
                        extra_paths.push(dir);
                    }
                }
            }
            CrossMode::Distcc => {
                {
                    let _guard = envlock::lock(&env.suffix);
                    self.chroot
                        .install(&["distcc".to_string()], &env.suffix, false)?;
                }
                self.distccd
                    .ensure_running(&env.carch, self.config.distccd_port)?;
            }
        }
        Ok(extra_paths)
    }

    /// For a dual-sysroot build, mount the foreign buildroot into the native
    /// environment, then the native tool directories on top of it so host
    /// binaries shadow foreign ones.
    fn mount_sysroot(&self, env: &ResolvedEnvironment) -> Result<MountStack<'_>> {
        let mut mounts = MountStack(Vec::new());
        if !env.dual_sysroot {
            return Ok(mounts);
        }
        let native_dir = self.config.chroot_dir(&Suffix::Native);
        let foreign_dir = self
            .config
            .chroot_dir(&Suffix::buildroot(env.carch.clone()));
        let sysroot = native_dir.join(
            self.config
                .cross_sysroot(&env.carch)
                .trim_start_matches('/'),
        );
        mounts
            .0
            .push(BindMount::new(self.chroot, &foreign_dir, &sysroot)?);
        for tool_dir in &self.config.aux_tool_dirs {
            let rel = tool_dir.trim_start_matches('/');
            mounts.0.push(BindMount::new(
                self.chroot,
                &native_dir.join(rel),
                &sysroot.join(rel),
            )?);
        }
        Ok(mounts)
    }

    /// Publish a noarch artifact into every other architecture's namespace
    /// as a relative symlink.
    fn symlink_noarch(
        &self,
        pkg: &PackageDefinition,
        env: &ResolvedEnvironment,
    ) -> Result<()> {
        let file = pkg.output_name(&self.config.pkg_ext);
        let root = self.config.packages_root();
        for arch in &self.config.arches {
            let ns = Suffix::for_arch(arch, &self.config.arch_native);
            if ns == env.suffix {
                continue;
            }
            let dir = root.join(ns.to_string());
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let link = dir.join(&file);
            if link.symlink_metadata().is_ok() {
                continue;
            }
            let target = Path::new("..").join(env.suffix.to_string()).join(&file);
            std::os::unix::fs::symlink(&target, &link).with_context(|| {
                format!("failed to link {} into '{ns}'", file)
            })?;
            debug!("linked {file} into namespace '{ns}'");
            self.clear_index(&ns)?;
        }
        Ok(())
    }

    fn clear_index(&self, suffix: &Suffix) -> Result<()> {
        let index = self
            .config
            .packages_root()
            .join(suffix.to_string())
            .join("APKINDEX.tar.gz");
        self.repo.clear_index_cache(&index)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn test_config() -> Config {
        Config::with_roots(PathBuf::from("/work"), PathBuf::from("/aports"))
    }

    fn native_env() -> ResolvedEnvironment {
        ResolvedEnvironment {
            carch: Arch::from("x86_64"),
            suffix: Suffix::Native,
            cross: CrossMode::None,
            dual_sysroot: false,
        }
    }

    #[test]
    fn test_builder_cmd_native() {
        let config = test_config();
        let cmd = builder_cmd(&config, &native_env(), BuildOptions::default(), &[]).unwrap();
        assert_eq!(cmd, vec!["CARCH=x86_64", "abuild", "-d"]);
    }

    #[test]
    fn test_builder_cmd_strict_force() {
        let config = test_config();
        let opts = BuildOptions {
            force: true,
            strict: true,
            buildinfo: false,
        };
        let cmd = builder_cmd(&config, &native_env(), opts, &[]).unwrap();
        assert_eq!(cmd, vec!["CARCH=x86_64", "abuild", "-r", "-f"]);
    }

    #[test]
    fn test_builder_cmd_native_cross() {
        let config = test_config();
        let env = ResolvedEnvironment {
            carch: Arch::from("armhf"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: true,
        };
        let cmd = builder_cmd(&config, &env, BuildOptions::default(), &[]).unwrap();
        let sysroot = "/home/user/cross_sysroot/buildroot_armhf";
        assert_eq!(
            cmd,
            vec![
                "CARCH=armhf".to_string(),
                "CROSS_COMPILE=armv6-alpine-linux-muslgnueabihf-".into(),
                "CC=armv6-alpine-linux-muslgnueabihf-gcc".into(),
                format!("CBUILDROOT={sysroot}"),
                "CHOST=armv6-alpine-linux-muslgnueabihf".into(),
                format!("CROSS_CFLAGS=--sysroot={sysroot}"),
                format!("CPPFLAGS=--sysroot={sysroot}"),
                format!("LDFLAGS=--sysroot={sysroot} -L{sysroot}/lib"),
                format!(
                    "PKG_CONFIG_PATH={sysroot}/usr/lib/pkgconfig/:{sysroot}/usr/share/pkgconfig"
                ),
                format!("PKG_CONFIG_SYSROOT_DIR={sysroot}"),
                "abuild".into(),
                "-d".into(),
            ]
        );
    }

    #[test]
    fn test_builder_cmd_plain_native_cross_has_no_sysroot_vars() {
        let config = test_config();
        let env = ResolvedEnvironment {
            carch: Arch::from("armhf"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: false,
        };
        let cmd = builder_cmd(&config, &env, BuildOptions::default(), &[]).unwrap();
        assert_eq!(
            cmd,
            vec![
                "CARCH=armhf",
                "CROSS_COMPILE=armv6-alpine-linux-muslgnueabihf-",
                "CC=armv6-alpine-linux-muslgnueabihf-gcc",
                "abuild",
                "-d",
            ]
        );
    }

    #[test]
    fn test_builder_cmd_wrapper_path_prepended() {
        let config = test_config();
        let env = ResolvedEnvironment {
            carch: Arch::from("aarch64"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: true,
        };
        let cmd = builder_cmd(
            &config,
            &env,
            BuildOptions::default(),
            &["/usr/lib/crossforge/bin".to_string()],
        )
        .unwrap();
        let path = cmd.iter().find(|a| a.starts_with("PATH=")).unwrap();
        assert!(path.starts_with("PATH=/usr/lib/crossforge/bin:"));
    }

    #[test]
    fn test_builder_cmd_distcc() {
        let config = test_config();
        let env = ResolvedEnvironment {
            carch: Arch::from("aarch64"),
            suffix: Suffix::buildroot(Arch::from("aarch64")),
            cross: CrossMode::Distcc,
            dual_sysroot: false,
        };
        let cmd = builder_cmd(&config, &env, BuildOptions::default(), &[]).unwrap();
        assert!(cmd.contains(&format!(
            "PATH=/usr/lib/distcc/bin:{}",
            config.chroot_path
        )));
        assert!(cmd.contains(&"DISTCC_HOSTS=127.0.0.1:33632".to_string()));
        assert_eq!(cmd.last().unwrap(), "-d");
    }

    #[test]
    fn test_builder_cmd_unknown_triplet_fails() {
        let config = test_config();
        let env = ResolvedEnvironment {
            carch: Arch::from("riscv64"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: false,
        };
        assert!(builder_cmd(&config, &env, BuildOptions::default(), &[]).is_err());
    }

    #[test]
    fn test_partition_with_declared_split() {
        let pkg = PackageDefinition {
            makedepends: vec!["cmake".into(), "libfoo-dev".into()],
            makedepends_build: vec!["cmake".into()],
            makedepends_host: vec!["libfoo-dev".into()],
            ..Default::default()
        };
        let env = ResolvedEnvironment {
            carch: Arch::from("armhf"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: true,
        };
        let (build, host) = partition_makedepends(&pkg, &env);
        assert_eq!(build, vec!["cmake"]);
        assert_eq!(host, vec!["libfoo-dev"]);
    }

    #[test]
    fn test_partition_without_split_is_all_host() {
        let pkg = PackageDefinition {
            makedepends: vec!["cmake".into(), "libfoo-dev".into()],
            ..Default::default()
        };
        let env = ResolvedEnvironment {
            carch: Arch::from("armhf"),
            suffix: Suffix::Native,
            cross: CrossMode::Native,
            dual_sysroot: true,
        };
        let (build, host) = partition_makedepends(&pkg, &env);
        assert!(build.is_empty());
        assert_eq!(host, vec!["cmake", "libfoo-dev"]);
    }

    #[test]
    fn test_dep_opts_drops_force() {
        let opts = BuildOptions {
            force: true,
            strict: true,
            buildinfo: true,
        };
        let dep = dep_opts(opts);
        assert!(!dep.force);
        assert!(dep.strict);
        assert!(dep.buildinfo);
    }

    #[test]
    fn test_cross_packages() {
        assert_eq!(
            cross_packages(&Arch::from("aarch64")),
            vec!["gcc-aarch64", "g++-aarch64", "ccache-cross-symlinks"]
        );
    }
}
