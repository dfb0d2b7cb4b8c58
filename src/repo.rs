//! Package definition lookup and the binary package index client.
//!
//! The driver depends on the `PackageRepo` trait only. `LocalRepo` is a
//! filesystem implementation: build definitions are directories under the
//! aports tree carrying a `package.json` metadata record, and the binary
//! index is the packages root itself (one namespace directory per
//! environment suffix).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use crate::arch::{Arch, Suffix};
use crate::config::Config;
use crate::package::PackageDefinition;

/// Metadata record file name inside each package directory.
const RECORD_FILE: &str = "package.json";

pub trait PackageRepo {
    /// Look up a package's build definition by name.
    fn find(&self, pkgname: &str) -> Result<Option<PackageDefinition>>;

    /// Whether a binary build of the package exists in any known index for
    /// the given architecture.
    fn in_any_index(&self, pkgname: &str, arch: &Arch) -> Result<bool>;

    /// Whether the package needs to be (re)built for the architecture.
    fn is_necessary(&self, arch: &Arch, pkg: &PackageDefinition) -> Result<bool>;

    /// Drop any cached state for the given index file; called after an
    /// artifact is published into the index's namespace.
    fn clear_index_cache(&self, index: &Path) -> Result<()>;
}

/// Filesystem-backed implementation.
pub struct LocalRepo {
    aports: PathBuf,
    packages_root: PathBuf,
    pkg_ext: String,
    arch_native: Arch,
    /// Directory listings keyed by namespace dir, filled lazily.
    listings: Mutex<HashMap<PathBuf, Vec<String>>>,
}

impl LocalRepo {
    pub fn new(config: &Config) -> Self {
        LocalRepo {
            aports: config.aports.clone(),
            packages_root: config.packages_root(),
            pkg_ext: config.pkg_ext.clone(),
            arch_native: config.arch_native.clone(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    fn read_record(&self, dir: &Path) -> Result<PackageDefinition> {
        let path = dir.join(RECORD_FILE);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut pkg: PackageDefinition = serde_json::from_str(&data)
            .with_context(|| format!("invalid package record {}", path.display()))?;
        pkg.dir = dir.to_path_buf();
        Ok(pkg)
    }

    fn namespace_listing(&self, dir: &Path) -> Vec<String> {
        let mut listings = self.listings.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = listings.get(dir) {
            return cached.clone();
        }
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        listings.insert(dir.to_path_buf(), names.clone());
        names
    }

    /// Namespaces that may hold a build of `arch`: its own suffix namespace
    /// plus native (noarch artifacts land there).
    fn namespaces_for(&self, arch: &Arch) -> Vec<Suffix> {
        let own = Suffix::for_arch(arch, &self.arch_native);
        if own.is_native() {
            vec![own]
        } else {
            vec![own, Suffix::Native]
        }
    }
}

/// Whether a file name is a versioned artifact of `pkgname`.
fn is_artifact_of(file: &str, pkgname: &str, ext: &str) -> bool {
    let Some(rest) = file.strip_prefix(pkgname) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('-') else {
        return false;
    };
    // "foo-bar-1.0-r0.apk" must not count as an artifact of "foo".
    rest.chars().next().is_some_and(|c| c.is_ascii_digit())
        && rest.ends_with(&format!(".{ext}"))
}

impl PackageRepo for LocalRepo {
    fn find(&self, pkgname: &str) -> Result<Option<PackageDefinition>> {
        let direct = self.aports.join(pkgname);
        if direct.join(RECORD_FILE).exists() {
            return Ok(Some(self.read_record(&direct)?));
        }
        // Directory name and pkgname may differ; scan the tree.
        let Ok(entries) = fs::read_dir(&self.aports) else {
            return Ok(None);
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.join(RECORD_FILE).exists() {
                continue;
            }
            let pkg = self.read_record(&dir)?;
            if pkg.pkgname == pkgname {
                return Ok(Some(pkg));
            }
        }
        Ok(None)
    }

    fn in_any_index(&self, pkgname: &str, arch: &Arch) -> Result<bool> {
        for ns in self.namespaces_for(arch) {
            let dir = self.packages_root.join(ns.to_string());
            let hit = self
                .namespace_listing(&dir)
                .iter()
                .any(|f| is_artifact_of(f, pkgname, &self.pkg_ext));
            if hit {
                debug!("{pkgname} found in index namespace '{ns}'");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_necessary(&self, arch: &Arch, pkg: &PackageDefinition) -> Result<bool> {
        let file = pkg.output_name(&self.pkg_ext);
        for ns in self.namespaces_for(arch) {
            let path = self.packages_root.join(ns.to_string()).join(&file);
            // A symlink counts; noarch artifacts are references.
            if path.symlink_metadata().is_ok() {
                debug!(
                    "{} {}-r{} already built for {arch}",
                    pkg.pkgname, pkg.pkgver, pkg.pkgrel
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn clear_index_cache(&self, index: &Path) -> Result<()> {
        let Some(dir) = index.parent() else {
            return Ok(());
        };
        let mut listings = self.listings.lock().unwrap_or_else(|e| e.into_inner());
        listings.remove(dir);
        Ok(())
    }
}
