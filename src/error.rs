//! Fatal error taxonomy for the build driver.
//!
//! Every variant aborts the whole recursive call tree; nothing here is
//! recovered locally. The "skip if not necessary" short-circuits in the
//! driver are not errors and never show up in this enum.

use std::path::PathBuf;

use thiserror::Error;

use crate::arch::Arch;

#[derive(Debug, Error)]
pub enum BuildError {
    /// No local build definition and no binary package in any index.
    #[error("package '{0}': no build definition found, and no binary package in any index")]
    PackageNotFound(String),

    /// An explicitly requested architecture is not declared by the package.
    #[error(
        "architecture '{arch}' is not supported by package '{pkgname}' \
         (declared: {declared}); add it to the package's arch list and try again"
    )]
    UnsupportedArchitecture {
        pkgname: String,
        arch: Arch,
        declared: String,
    },

    /// The builder subprocess exited successfully but the expected output
    /// file is absent. A clean exit code alone is not trusted.
    #[error("builder reported success, but the artifact is missing: {0}")]
    BuildArtifactMissing(PathBuf),

    /// A required external executable could not be located.
    #[error("required tool '{0}' was not found in PATH")]
    ToolNotAvailable(String),
}
