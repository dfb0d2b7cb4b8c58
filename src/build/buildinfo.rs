//! Build-record snapshots.
//!
//! When requested, a JSON record is written next to the artifact capturing
//! what was built and how the environment was resolved, plus the artifact's
//! digest. Written once after a successful build and never mutated.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::arch::Arch;
use crate::build::autodetect::ResolvedEnvironment;
use crate::package::PackageDefinition;

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildRecord {
    pub output: String,
    pub pkgname: String,
    pub pkgver: String,
    pub pkgrel: String,
    pub arch: Vec<String>,
    pub carch: Arch,
    pub suffix: String,
    pub options: Vec<String>,
    pub sha256: String,
    pub timestamp: u64,
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Snapshot the build of `artifact`.
pub fn record(
    pkg: &PackageDefinition,
    env: &ResolvedEnvironment,
    artifact: &Path,
) -> Result<BuildRecord> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(BuildRecord {
        output: artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        pkgname: pkg.pkgname.clone(),
        pkgver: pkg.pkgver.clone(),
        pkgrel: pkg.pkgrel.clone(),
        arch: pkg.arch.clone(),
        carch: env.carch.clone(),
        suffix: env.suffix.to_string(),
        options: pkg.options.clone(),
        sha256: sha256_file(artifact)?,
        timestamp,
    })
}

/// Write the record next to the artifact as `<artifact>.buildinfo.json`.
pub fn write(
    pkg: &PackageDefinition,
    env: &ResolvedEnvironment,
    artifact: &Path,
) -> Result<PathBuf> {
    let record = record(pkg, env, artifact)?;
    let mut path = artifact.as_os_str().to_owned();
    path.push(".buildinfo.json");
    let path = PathBuf::from(path);
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write build record {}", path.display()))?;
    debug!("wrote build record {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::arch::Suffix;
    use crate::build::autodetect::CrossMode;

    #[test]
    fn test_write_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("hello-1.0-r0.apk");
        fs::write(&artifact, b"abc").unwrap();

        let pkg = PackageDefinition {
            pkgname: "hello".into(),
            pkgver: "1.0".into(),
            pkgrel: "0".into(),
            arch: vec!["all".into()],
            ..Default::default()
        };
        let env = ResolvedEnvironment {
            carch: Arch::from("aarch64"),
            suffix: Suffix::buildroot(Arch::from("aarch64")),
            cross: CrossMode::Distcc,
            dual_sysroot: false,
        };

        let path = write(&pkg, &env, &artifact).unwrap();
        assert_eq!(path, tmp.path().join("hello-1.0-r0.apk.buildinfo.json"));

        let parsed: BuildRecord =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.output, "hello-1.0-r0.apk");
        assert_eq!(parsed.suffix, "buildroot_aarch64");
        // sha256("abc")
        assert_eq!(
            parsed.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(parsed.timestamp > 0);
    }
}
