//! crossforge - cross-compilation build orchestrator.
//!
//! Given a package name and a target architecture, crossforge decides where
//! and how to build (native environment, foreign buildroot, distcc or
//! native cross compilation), recursively builds the build-time
//! dependencies, stages the toolchain and sources, invokes the external
//! builder and verifies the published artifact.

pub mod arch;
pub mod build;
pub mod chroot;
pub mod config;
pub mod distccd;
pub mod envlock;
pub mod error;
pub mod package;
pub mod pattern;
pub mod preflight;
pub mod process;
pub mod repo;
pub mod vm;
