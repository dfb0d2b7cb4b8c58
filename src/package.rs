//! Package metadata as produced by the external definition parser.
//!
//! The orchestrator only reads these records; how they are parsed out of a
//! build definition is not its business. The local repository implementation
//! deserializes them from a JSON file per package directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::arch::Arch;

/// Immutable package metadata record, one per build definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageDefinition {
    pub pkgname: String,
    pub pkgver: String,
    pub pkgrel: String,

    /// Declared architecture support. May contain the wildcard "all" or the
    /// "noarch" marker for architecture-independent packages.
    #[serde(default)]
    pub arch: Vec<String>,

    /// Build-time dependencies.
    #[serde(default)]
    pub makedepends: Vec<String>,

    /// Optional split of `makedepends` for dual-sysroot cross builds:
    /// dependencies that must run on the build machine.
    #[serde(default)]
    pub makedepends_build: Vec<String>,

    /// The other half of the split: dependencies the target links against.
    #[serde(default)]
    pub makedepends_host: Vec<String>,

    /// Build option flags, e.g. "!tracedeps".
    #[serde(default)]
    pub options: Vec<String>,

    /// Directory the build definition lives in. Filled in by the lookup
    /// implementation, not part of the serialized record.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl PackageDefinition {
    pub fn is_noarch(&self) -> bool {
        self.arch.iter().any(|a| a == "noarch")
    }

    pub fn supports_all(&self) -> bool {
        self.arch.iter().any(|a| a == "all")
    }

    pub fn supports(&self, arch: &Arch) -> bool {
        self.arch.iter().any(|a| a == arch.as_str())
    }

    /// Repackaging convention: `<name>-repack` packages only rearrange an
    /// existing artifact and never need a foreign toolchain.
    pub fn is_repack(&self) -> bool {
        self.pkgname.ends_with("-repack")
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Whether the package declares an explicit build/host makedepends split.
    pub fn has_split_makedepends(&self) -> bool {
        !self.makedepends_build.is_empty() || !self.makedepends_host.is_empty()
    }

    /// File name of the artifact this package produces.
    pub fn output_name(&self, ext: &str) -> String {
        format!("{}-{}-r{}.{}", self.pkgname, self.pkgver, self.pkgrel, ext)
    }
}

/// Per-request build flags. Created once per top-level invocation and once
/// per recursive dependency edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Build even if the necessity check says the artifact is current.
    pub force: bool,
    /// Recursively build dependencies instead of installing prebuilt ones,
    /// and uninstall them from the environment afterwards.
    pub strict: bool,
    /// Emit a build-record snapshot next to the artifact.
    pub buildinfo: bool,
}
