//! CPU architecture names and the build-environment suffix namespace.
//!
//! Architectures are the ecosystem's short names (`x86_64`, `aarch64`,
//! `armhf`, `x86`), not GNU triplets. The triplet, the qemu system name and
//! the CMake processor name are derived here so the rest of the code never
//! hardcodes the mapping tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A target CPU architecture in the package ecosystem's naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arch(String);

impl Arch {
    pub fn new(name: impl Into<String>) -> Self {
        Arch(name.into())
    }

    /// The architecture of the machine this process runs on.
    pub fn native() -> Self {
        let name = match std::env::consts::ARCH {
            "x86_64" => "x86_64",
            "x86" => "x86",
            "aarch64" => "aarch64",
            "arm" => "armhf",
            other => other,
        };
        Arch(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// GNU hostspec triplet for the cross toolchain, if known.
    pub fn hostspec(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "x86_64" => Some("x86_64-alpine-linux-musl"),
            "x86" => Some("i586-alpine-linux-musl"),
            "aarch64" => Some("aarch64-alpine-linux-musl"),
            "armhf" => Some("armv6-alpine-linux-muslgnueabihf"),
            "armv7" => Some("armv7-alpine-linux-musleabihf"),
            _ => None,
        }
    }

    /// Suffix of the matching `qemu-system-*` executable.
    pub fn qemu_system(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "x86_64" => Some("x86_64"),
            "x86" => Some("i386"),
            "aarch64" => Some("aarch64"),
            "armhf" | "armv7" => Some("arm"),
            _ => None,
        }
    }

    /// What CMake expects in CMAKE_SYSTEM_PROCESSOR (matches `uname -m`
    /// output on the target).
    pub fn cmake_processor(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "armhf" | "armv7" => Some("arm"),
            "aarch64" => Some("aarch64"),
            "x86_64" => Some("x86_64"),
            _ => None,
        }
    }

    /// Whether building for this architecture on `native` hardware needs
    /// CPU emulation or a cross toolchain.
    pub fn emulation_required(&self, native: &Arch) -> bool {
        self != native
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Arch {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Arch(s.to_string()))
    }
}

impl From<&str> for Arch {
    fn from(s: &str) -> Self {
        Arch(s.to_string())
    }
}

/// A named, isolated build environment.
///
/// Exactly one suffix is `native`; every other suffix is architecture
/// qualified and 1:1 with a non-native target architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Suffix {
    Native,
    Buildroot(Arch),
}

impl Suffix {
    pub fn buildroot(arch: Arch) -> Self {
        Suffix::Buildroot(arch)
    }

    /// The suffix whose output namespace belongs to `arch`.
    pub fn for_arch(arch: &Arch, native: &Arch) -> Self {
        if arch == native {
            Suffix::Native
        } else {
            Suffix::Buildroot(arch.clone())
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Suffix::Native)
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suffix::Native => f.write_str("native"),
            Suffix::Buildroot(arch) => write!(f, "buildroot_{arch}"),
        }
    }
}
