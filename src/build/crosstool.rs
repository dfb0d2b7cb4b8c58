//! Build-system wrapper tooling for native-cross builds.
//!
//! Some build systems won't cross compile from environment variables alone.
//! For those we detect the build system from the package's makedepends and
//! drop wrapper tooling into the native environment: currently a CMake
//! toolchain file plus a `cmake` shim that injects it, on a PATH prepended
//! ahead of the real binary.

use anyhow::{Context, Result};

use crate::arch::{Arch, Suffix};
use crate::chroot::ChrootOps;
use crate::config::Config;
use crate::package::PackageDefinition;

/// Wrapper shim directory inside the native environment, prepended to PATH
/// for the builder invocation when a wrapper applies.
pub const WRAPPER_BIN: &str = "/usr/lib/crossforge/bin";

/// Where the generated CMake toolchain file lives inside the native
/// environment.
pub const TOOLCHAIN_FILE: &str = "/home/user/.crossforge-toolchain.cmake";

/// Whether the package builds with CMake.
pub fn uses_cmake(pkg: &PackageDefinition) -> bool {
    pkg.makedepends.iter().any(|d| d == "cmake")
}

/// CMake toolchain file targeting `carch` against the mounted sysroot.
pub fn toolchain_file_content(config: &Config, carch: &Arch) -> Result<String> {
    let hostspec = carch
        .hostspec()
        .with_context(|| format!("no cross toolchain triplet known for '{carch}'"))?;
    let processor = carch
        .cmake_processor()
        .with_context(|| format!("no CMake processor name known for '{carch}'"))?;
    let sysroot = config.cross_sysroot(carch);
    Ok(format!(
        "set(CMAKE_SYSTEM_NAME Linux)\n\
         set(CMAKE_SYSTEM_PROCESSOR {processor})\n\
         set(CMAKE_C_COMPILER {hostspec}-gcc)\n\
         set(CMAKE_CXX_COMPILER {hostspec}-g++)\n\
         set(CMAKE_FIND_ROOT_PATH {sysroot})\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_PROGRAM NEVER)\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_LIBRARY ONLY)\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_INCLUDE ONLY)\n"
    ))
}

fn cmake_shim() -> String {
    format!("#!/bin/sh\nexec /usr/bin/cmake -DCMAKE_TOOLCHAIN_FILE={TOOLCHAIN_FILE} \"$@\"\n")
}

/// Install wrapper tooling for a dual-sysroot cross build of `pkg`.
/// Returns the PATH entry to prepend, or `None` when no wrapper applies.
pub fn install(
    chroot: &dyn ChrootOps,
    config: &Config,
    pkg: &PackageDefinition,
    carch: &Arch,
) -> Result<Option<String>> {
    if !uses_cmake(pkg) {
        return Ok(None);
    }
    chroot.write_file(
        &Suffix::Native,
        TOOLCHAIN_FILE,
        &toolchain_file_content(config, carch)?,
    )?;
    let shim = format!("{WRAPPER_BIN}/cmake");
    chroot.write_file(&Suffix::Native, &shim, &cmake_shim())?;
    chroot.run_root(
        &["chmod".into(), "755".into(), shim],
        &Suffix::Native,
    )?;
    Ok(Some(WRAPPER_BIN.to_string()))
}
