//! Build-environment resolution and the recursive package build driver.

pub mod autodetect;
pub mod buildinfo;
pub mod crosstool;
pub mod driver;

pub use autodetect::{CrossMode, ResolvedEnvironment};
pub use driver::Driver;
