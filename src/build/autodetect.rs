//! Build environment autodetection.
//!
//! Pure functions that compute, for one package and one requested
//! architecture, where and how the build runs: the concrete build
//! architecture, the environment suffix, the cross-compilation mode and
//! whether a dual-sysroot dependency set is required. The driver never
//! branches on these concerns inline; the whole decision matrix lives here
//! so it can be tested exhaustively.

use anyhow::{bail, Result};

use crate::arch::{Arch, Suffix};
use crate::config::Config;
use crate::error::BuildError;
use crate::package::PackageDefinition;
use crate::pattern;

/// How compilation is performed when the build architecture is foreign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossMode {
    /// No cross support needed (native arch, repack, or cross disabled).
    None,
    /// Host-architecture toolchain in the native environment produces
    /// foreign-architecture output ("native cross").
    Native,
    /// The foreign buildroot delegates compilation to a distcc daemon
    /// running in the native environment.
    Distcc,
}

/// Fully resolved build environment for one package build attempt.
/// Computed fresh for every call; never cached, because package metadata or
/// the requested architecture may differ per recursive call.
#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    pub carch: Arch,
    pub suffix: Suffix,
    pub cross: CrossMode,
    /// Native-cross build that also needs the full foreign dependency set
    /// bind-mounted as a second sysroot.
    pub dual_sysroot: bool,
}

/// Pick the concrete build architecture for a package.
pub fn build_arch(
    config: &Config,
    pkg: &PackageDefinition,
    requested: Option<&Arch>,
    strict: bool,
) -> Result<Arch> {
    if pkg.is_noarch() {
        if let Some(arch) = &config.noarch_arch {
            return Ok(arch.clone());
        }
        if strict {
            return Ok(config.device_arch.clone());
        }
        return Ok(config.arch_native.clone());
    }

    if let Some(requested) = requested {
        if !pkg.supports_all() && !pkg.supports(requested) {
            return Err(BuildError::UnsupportedArchitecture {
                pkgname: pkg.pkgname.clone(),
                arch: requested.clone(),
                declared: pkg.arch.join(" "),
            }
            .into());
        }
        return Ok(requested.clone());
    }

    if pkg.supports_all() || pkg.supports(&config.arch_native) {
        return Ok(config.arch_native.clone());
    }

    // Deterministic, order-preserving fallback.
    match pkg.arch.first() {
        Some(first) => Ok(Arch::new(first.clone())),
        None => bail!("package '{}' declares no architectures", pkg.pkgname),
    }
}

/// Pick the environment the compilation step runs in.
///
/// Packages whose build tooling cannot run under emulation must build
/// natively even when producing foreign output; the pattern lists encode
/// those known exceptions centrally.
pub fn suffix(config: &Config, pkg: &PackageDefinition, carch: &Arch, strict: bool) -> Suffix {
    if *carch == config.arch_native {
        return Suffix::Native;
    }
    // Repackaging never needs a foreign toolchain.
    if pkg.is_repack() {
        return Suffix::Native;
    }
    if config.cross {
        if pkg.makedepends.iter().any(|d| d == "extra-cmake-modules") {
            return Suffix::Native;
        }
        let patterns = if strict || config.prefer_distcc_cross {
            &config.cross_native_nodeps_patterns
        } else {
            &config.cross_native_patterns
        };
        if pattern::matches_any(patterns, &pkg.pkgname) {
            return Suffix::Native;
        }
    }
    Suffix::buildroot(carch.clone())
}

/// Pick the cross-compilation mode for an architecture/suffix pairing.
pub fn cross_mode(
    config: &Config,
    pkg: &PackageDefinition,
    carch: &Arch,
    suffix: &Suffix,
) -> CrossMode {
    if !config.cross {
        return CrossMode::None;
    }
    if pkg.is_repack() {
        return CrossMode::None;
    }
    if !carch.emulation_required(&config.arch_native) {
        return CrossMode::None;
    }
    if suffix.is_native() {
        CrossMode::Native
    } else {
        CrossMode::Distcc
    }
}

/// Whether a native-cross build of this package can skip the dual-sysroot
/// dependency set: its name is on the no-dependency-tracing exception list.
pub fn is_cross_native_nodeps(config: &Config, pkg: &PackageDefinition) -> bool {
    pattern::matches_any(&config.cross_native_nodeps_patterns, &pkg.pkgname)
}

/// Run the full decision matrix for one build attempt.
pub fn resolve(
    config: &Config,
    pkg: &PackageDefinition,
    requested: Option<&Arch>,
    strict: bool,
) -> Result<ResolvedEnvironment> {
    let carch = build_arch(config, pkg, requested, strict)?;
    let suffix = suffix(config, pkg, &carch, strict);
    let cross = cross_mode(config, pkg, &carch, &suffix);
    let dual_sysroot = cross == CrossMode::Native
        && !pkg.has_option("!tracedeps")
        && !is_cross_native_nodeps(config, pkg);
    Ok(ResolvedEnvironment {
        carch,
        suffix,
        cross,
        dual_sysroot,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn test_config() -> Config {
        Config::with_roots(PathBuf::from("/work"), PathBuf::from("/aports"))
    }

    fn pkg(name: &str, arches: &[&str]) -> PackageDefinition {
        PackageDefinition {
            pkgname: name.into(),
            pkgver: "1.0".into(),
            pkgrel: "0".into(),
            arch: arches.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    // --- build_arch -------------------------------------------------------

    #[test]
    fn test_arch_all_never_fails() {
        let config = test_config();
        let p = pkg("hello", &["all"]);
        for requested in ["x86_64", "aarch64", "armhf", "riscv64"] {
            let arch = build_arch(&config, &p, Some(&Arch::from(requested)), false).unwrap();
            assert_eq!(arch, Arch::from(requested));
        }
        assert_eq!(
            build_arch(&config, &p, None, false).unwrap(),
            config.arch_native
        );
    }

    #[test]
    fn test_arch_noarch_variants() {
        let mut config = test_config();
        let p = pkg("scripts", &["noarch"]);

        // Plain: host native arch.
        assert_eq!(
            build_arch(&config, &p, None, false).unwrap(),
            Arch::from("x86_64")
        );
        // Strict: configured device arch.
        assert_eq!(
            build_arch(&config, &p, None, true).unwrap(),
            Arch::from("aarch64")
        );
        // Explicit override wins over both.
        config.noarch_arch = Some(Arch::from("armhf"));
        assert_eq!(
            build_arch(&config, &p, None, true).unwrap(),
            Arch::from("armhf")
        );
        // Never fails, whatever is requested.
        assert!(build_arch(&config, &p, Some(&Arch::from("weird")), false).is_ok());
    }

    #[test]
    fn test_arch_explicit_request_outside_list_fails() {
        let config = test_config();
        let p = pkg("uboot", &["armhf", "aarch64"]);
        let err = build_arch(&config, &p, Some(&Arch::from("x86_64")), false).unwrap_err();
        let build_err = err.downcast_ref::<BuildError>().unwrap();
        assert!(matches!(
            build_err,
            BuildError::UnsupportedArchitecture { .. }
        ));
    }

    #[test]
    fn test_arch_explicit_request_inside_list() {
        let config = test_config();
        let p = pkg("uboot", &["armhf", "aarch64"]);
        assert_eq!(
            build_arch(&config, &p, Some(&Arch::from("aarch64")), false).unwrap(),
            Arch::from("aarch64")
        );
    }

    #[test]
    fn test_arch_first_declared_fallback() {
        let config = test_config();
        let p = pkg("uboot", &["armhf", "aarch64"]);
        assert_eq!(
            build_arch(&config, &p, None, false).unwrap(),
            Arch::from("armhf")
        );
    }

    #[test]
    fn test_arch_empty_list_is_an_error() {
        let config = test_config();
        let p = pkg("broken", &[]);
        assert!(build_arch(&config, &p, None, false).is_err());
    }

    // --- suffix -----------------------------------------------------------

    #[test]
    fn test_suffix_native_arch() {
        let config = test_config();
        let p = pkg("hello", &["all"]);
        assert_eq!(
            suffix(&config, &p, &Arch::from("x86_64"), false),
            Suffix::Native
        );
    }

    #[test]
    fn test_suffix_foreign_arch_default_buildroot() {
        let config = test_config();
        let p = pkg("hello", &["aarch64"]);
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), false),
            Suffix::buildroot(Arch::from("aarch64"))
        );
    }

    #[test]
    fn test_suffix_repack_is_native() {
        let config = test_config();
        let p = pkg("firmware-repack", &["aarch64"]);
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), false),
            Suffix::Native
        );
    }

    #[test]
    fn test_suffix_cmake_native_tool_dependency() {
        let config = test_config();
        let mut p = pkg("kde-thing", &["aarch64"]);
        p.makedepends = vec!["extra-cmake-modules".into()];
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), false),
            Suffix::Native
        );
    }

    #[test]
    fn test_suffix_exception_list_match() {
        let config = test_config();
        let p = pkg("device-qemu-amd64", &["aarch64"]);
        // "device-*" is only on the general list.
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), false),
            Suffix::Native
        );
        // Strict mode uses the stricter nodeps list, which doesn't match.
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), true),
            Suffix::buildroot(Arch::from("aarch64"))
        );
    }

    #[test]
    fn test_suffix_prefer_distcc_uses_nodeps_list() {
        let mut config = test_config();
        config.prefer_distcc_cross = true;
        let p = pkg("device-qemu-amd64", &["aarch64"]);
        assert_eq!(
            suffix(&config, &p, &Arch::from("aarch64"), false),
            Suffix::buildroot(Arch::from("aarch64"))
        );
    }

    #[test]
    fn test_suffix_idempotent_and_closed() {
        let config = test_config();
        for name in ["hello", "linux-qemu", "device-x", "foo-repack"] {
            for carch in ["x86_64", "aarch64", "armhf"] {
                for strict in [false, true] {
                    let p = pkg(name, &[carch]);
                    let carch = Arch::from(carch);
                    let first = suffix(&config, &p, &carch, strict);
                    let second = suffix(&config, &p, &carch, strict);
                    assert_eq!(first, second);
                    // Result space is closed: native or buildroot_<carch>.
                    assert!(
                        first == Suffix::Native || first == Suffix::buildroot(carch.clone()),
                        "unexpected suffix {first}"
                    );
                }
            }
        }
    }

    // --- cross_mode -------------------------------------------------------

    #[test]
    fn test_cross_mode_none_at_native_arch_for_all_inputs() {
        let config = test_config();
        let carch = Arch::from("x86_64");
        for name in ["hello", "linux-foo", "foo-repack"] {
            let p = pkg(name, &["all"]);
            for s in [Suffix::Native, Suffix::buildroot(carch.clone())] {
                assert_eq!(cross_mode(&config, &p, &carch, &s), CrossMode::None);
            }
        }
    }

    #[test]
    fn test_cross_mode_disabled_globally() {
        let mut config = test_config();
        config.cross = false;
        let p = pkg("hello", &["aarch64"]);
        let s = Suffix::buildroot(Arch::from("aarch64"));
        assert_eq!(
            cross_mode(&config, &p, &Arch::from("aarch64"), &s),
            CrossMode::None
        );
    }

    #[test]
    fn test_cross_mode_repack_is_none() {
        let config = test_config();
        let p = pkg("firmware-repack", &["aarch64"]);
        assert_eq!(
            cross_mode(&config, &p, &Arch::from("aarch64"), &Suffix::Native),
            CrossMode::None
        );
    }

    #[test]
    fn test_cross_mode_native_and_distcc() {
        let config = test_config();
        let p = pkg("hello", &["aarch64"]);
        let carch = Arch::from("aarch64");
        assert_eq!(
            cross_mode(&config, &p, &carch, &Suffix::Native),
            CrossMode::Native
        );
        assert_eq!(
            cross_mode(&config, &p, &carch, &Suffix::buildroot(carch.clone())),
            CrossMode::Distcc
        );
    }

    // --- classifier / dual sysroot ---------------------------------------

    #[test]
    fn test_nodeps_classifier() {
        let config = test_config();
        assert!(is_cross_native_nodeps(&config, &pkg("linux-qemu", &["all"])));
        assert!(!is_cross_native_nodeps(&config, &pkg("hello", &["all"])));
    }

    #[test]
    fn test_dual_sysroot_flag() {
        let mut config = test_config();
        config.cross_native_patterns.push("gcc-*".into());

        // Native-cross package with dependency tracing: dual sysroot.
        let p = pkg("gcc-armhf", &["armhf"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.cross, CrossMode::Native);
        assert!(env.dual_sysroot);

        // The "!tracedeps" option opts out.
        let mut p = pkg("gcc-armhf", &["armhf"]);
        p.options = vec!["!tracedeps".into()];
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.cross, CrossMode::Native);
        assert!(!env.dual_sysroot);

        // So does a nodeps-list match.
        let p = pkg("linux-device", &["armhf"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.cross, CrossMode::Native);
        assert!(!env.dual_sysroot);

        // Distcc builds never use a dual sysroot.
        let p = pkg("hello", &["armhf"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.cross, CrossMode::Distcc);
        assert!(!env.dual_sysroot);
    }

    // --- scenarios from the test plan ------------------------------------

    #[test]
    fn test_scenario_native_all_package() {
        // arch=["all"], no deps, native x86_64, no requested arch.
        let config = test_config();
        let p = pkg("hello-world", &["all"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.carch, Arch::from("x86_64"));
        assert_eq!(env.suffix, Suffix::Native);
        assert_eq!(env.cross, CrossMode::None);
        assert!(!env.dual_sysroot);
    }

    #[test]
    fn test_scenario_foreign_package_distcc() {
        // arch=["aarch64"], native x86_64, cross enabled, no exception.
        let config = test_config();
        let p = pkg("hello-arm", &["aarch64"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.carch, Arch::from("aarch64"));
        assert_eq!(env.suffix, Suffix::buildroot(Arch::from("aarch64")));
        assert_eq!(env.cross, CrossMode::Distcc);
    }

    #[test]
    fn test_scenario_foreign_package_on_exception_list() {
        // Same, but the name matches the general exception list.
        let config = test_config();
        let p = pkg("linux-postmarketos", &["aarch64"]);
        let env = resolve(&config, &p, None, false).unwrap();
        assert_eq!(env.carch, Arch::from("aarch64"));
        assert_eq!(env.suffix, Suffix::Native);
        assert_eq!(env.cross, CrossMode::Native);
    }
}
