//! Configuration management for crossforge.
//!
//! Everything is read once at startup from environment variables (a `.env`
//! file is loaded first by main, environment wins) into an immutable Config
//! that gets passed explicitly into every resolver and driver call. There is
//! no hidden global state.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::arch::{Arch, Suffix};

/// Default exception list: packages that must always build in the native
/// environment even when they are cross targets.
const DEFAULT_CROSS_NATIVE: &[&str] = &["linux-*", "device-*"];

/// Stricter subset used when recursive dependency installation is avoided.
const DEFAULT_CROSS_NATIVE_NODEPS: &[&str] = &["linux-*"];

/// PATH used for commands executed inside a build environment.
const DEFAULT_CHROOT_PATH: &str =
    "/usr/lib/ccache/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Immutable process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Work directory holding the build environments and the packages root.
    pub work: PathBuf,
    /// Directory containing one subdirectory per package definition.
    pub aports: PathBuf,

    /// Architecture of the machine crossforge runs on.
    pub arch_native: Arch,
    /// Architecture of the configured target device (used for noarch
    /// packages in strict mode).
    pub device_arch: Arch,
    /// Explicit override architecture for noarch packages.
    pub noarch_arch: Option<Arch>,
    /// All architectures with an output namespace (noarch artifacts are
    /// referenced from each of them).
    pub arches: Vec<Arch>,

    /// Global cross-compilation toggle.
    pub cross: bool,
    /// Prefer delegating compilation to distcc over native-cross exceptions.
    pub prefer_distcc_cross: bool,
    /// Glob patterns of packages that always build natively.
    pub cross_native_patterns: Vec<String>,
    /// Stricter pattern subset: native-cross builds of these need no
    /// dual-sysroot dependency set.
    pub cross_native_nodeps_patterns: Vec<String>,
    /// Local port the distributed-compilation daemon listens on.
    pub distccd_port: u16,

    /// External builder executable invoked inside the environment.
    pub builder: String,
    /// Artifact file extension.
    pub pkg_ext: String,
    /// PATH inside the build environments.
    pub chroot_path: String,
    /// Parallelism handed to the builder.
    pub jobs: usize,

    /// Where the foreign sysroot tree is mounted inside the native
    /// environment during dual-sysroot cross builds.
    pub cross_sysroot_dir: String,
    /// Build working directory inside an environment.
    pub build_path: String,
    /// Native tool directories bind-mounted on top of the mounted sysroot.
    pub aux_tool_dirs: Vec<String>,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn load() -> Result<Self> {
        let work = match env_var("CROSSFORGE_WORK") {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .context("could not determine home directory; set CROSSFORGE_WORK")?
                .join(".local/var/crossforge"),
        };
        let aports = env_var("CROSSFORGE_APORTS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("aports"));

        let arch_native = Arch::native();
        let device_arch = env_var("CROSSFORGE_DEVICE_ARCH")
            .map(Arch::new)
            .unwrap_or_else(|| Arch::from("aarch64"));
        let noarch_arch = env_var("CROSSFORGE_NOARCH_ARCH").map(Arch::new);

        let arches = match env_var("CROSSFORGE_ARCHES") {
            Some(list) => parse_list(&list).into_iter().map(Arch::new).collect(),
            None => ["x86_64", "x86", "armhf", "aarch64"]
                .iter()
                .map(|a| Arch::from(*a))
                .collect(),
        };

        let distccd_port = match env_var("CROSSFORGE_DISTCCD_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid CROSSFORGE_DISTCCD_PORT: '{port}'"))?,
            None => 33632,
        };

        let jobs = match env_var("CROSSFORGE_JOBS") {
            Some(jobs) => jobs
                .parse()
                .with_context(|| format!("invalid CROSSFORGE_JOBS: '{jobs}'"))?,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };

        Ok(Config {
            work,
            aports,
            arch_native,
            device_arch,
            noarch_arch,
            arches,
            cross: env_bool("CROSSFORGE_CROSS", true),
            prefer_distcc_cross: env_bool("CROSSFORGE_PREFER_DISTCC_CROSS", false),
            cross_native_patterns: env_list("CROSSFORGE_CROSS_NATIVE", DEFAULT_CROSS_NATIVE),
            cross_native_nodeps_patterns: env_list(
                "CROSSFORGE_CROSS_NATIVE_NODEPS",
                DEFAULT_CROSS_NATIVE_NODEPS,
            ),
            distccd_port,
            builder: env_var("CROSSFORGE_BUILDER").unwrap_or_else(|| "abuild".to_string()),
            pkg_ext: env_var("CROSSFORGE_PKG_EXT").unwrap_or_else(|| "apk".to_string()),
            chroot_path: DEFAULT_CHROOT_PATH.to_string(),
            jobs,
            cross_sysroot_dir: "/home/user/cross_sysroot".to_string(),
            build_path: "/home/user/build".to_string(),
            aux_tool_dirs: vec!["/usr/lib/ccache/bin".to_string()],
        })
    }

    /// Configuration with defaults rooted at an explicit work/aports pair.
    /// Used by tests; `load()` goes through the environment instead.
    pub fn with_roots(work: PathBuf, aports: PathBuf) -> Self {
        Config {
            work,
            aports,
            arch_native: Arch::from("x86_64"),
            device_arch: Arch::from("aarch64"),
            noarch_arch: None,
            arches: ["x86_64", "x86", "armhf", "aarch64"]
                .iter()
                .map(|a| Arch::from(*a))
                .collect(),
            cross: true,
            prefer_distcc_cross: false,
            cross_native_patterns: DEFAULT_CROSS_NATIVE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cross_native_nodeps_patterns: DEFAULT_CROSS_NATIVE_NODEPS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            distccd_port: 33632,
            builder: "abuild".to_string(),
            pkg_ext: "apk".to_string(),
            chroot_path: DEFAULT_CHROOT_PATH.to_string(),
            jobs: 2,
            cross_sysroot_dir: "/home/user/cross_sysroot".to_string(),
            build_path: "/home/user/build".to_string(),
            aux_tool_dirs: vec!["/usr/lib/ccache/bin".to_string()],
        }
    }

    /// Root of the published artifact namespaces.
    pub fn packages_root(&self) -> PathBuf {
        self.work.join("packages")
    }

    /// Host-side directory of a build environment.
    pub fn chroot_dir(&self, suffix: &Suffix) -> PathBuf {
        self.work.join(format!("chroot_{suffix}"))
    }

    /// Path, inside the native environment, where the foreign sysroot for
    /// `carch` gets bind-mounted during dual-sysroot cross builds.
    pub fn cross_sysroot(&self, carch: &Arch) -> String {
        format!(
            "{}/{}",
            self.cross_sysroot_dir,
            Suffix::buildroot(carch.clone())
        )
    }

    /// Print the effective configuration.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  work:        {}", self.work.display());
        println!("  aports:      {}", self.aports.display());
        println!("  arch native: {}", self.arch_native);
        println!("  device arch: {}", self.device_arch);
        println!("  cross:       {}", self.cross);
        println!("  builder:     {}", self.builder);
        println!("  distccd:     127.0.0.1:{}", self.distccd_port);
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_var(key) {
        Some(v) => matches!(v.trim(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env_var(key) {
        Some(v) => parse_list(&v),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
