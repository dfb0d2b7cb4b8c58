//! Preflight checks: verify the host before touching any environment.
//!
//! Run with `crossforge preflight`. Required tools cover chroot management;
//! optional ones cover the VM flow and faster builds.

use std::path::Path;

use crate::arch::Arch;
use crate::config::Config;
use crate::process;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Build will fail without this.
    Fail,
    Warn,
}

impl CheckResult {
    fn pass_with(name: &str, details: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details),
        }
    }

    fn fail(name: &str, details: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details),
        }
    }

    fn warn(name: &str, details: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Name of the first missing required tool, if any.
    pub fn first_missing_required(&self) -> Option<&str> {
        self.checks
            .iter()
            .find(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name.as_str())
    }

    pub fn print(&self) {
        println!("Preflight checks:\n");
        for check in &self.checks {
            let status = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Warn => "WARN",
            };
            match &check.details {
                Some(details) => println!("  [{status}] {}: {details}", check.name),
                None => println!("  [{status}] {}", check.name),
            }
        }
        let failed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count();
        println!();
        if failed > 0 {
            println!("{failed} check(s) failed; builds will not succeed.");
        } else {
            println!("All required checks passed.");
        }
    }
}

fn check_tool(name: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(name) {
        Some(path) => CheckResult::pass_with(name, path.display().to_string()),
        None => {
            let msg = format!("not found in PATH ({purpose})");
            if required {
                CheckResult::fail(name, msg)
            } else {
                CheckResult::warn(name, msg)
            }
        }
    }
}

/// Run all preflight checks against the current host and configuration.
pub fn run(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    let required = [
        ("sudo", "environment mutation runs as root"),
        ("chroot", "entering build environments"),
        ("mount", "bind mounts for cross sysroots"),
        ("umount", "releasing bind mounts"),
        ("mountpoint", "detecting existing mounts"),
        ("apk.static", "bootstrapping build environments"),
    ];
    for (tool, purpose) in required {
        checks.push(check_tool(tool, purpose, true));
    }

    let qemu = Arch::native()
        .qemu_system()
        .map(|s| format!("qemu-system-{s}"));
    let optional: Vec<(String, &str)> = vec![
        (
            qemu.unwrap_or_else(|| "qemu-system-x86_64".to_string()),
            "needed for `crossforge run`",
        ),
        ("distcc".to_string(), "faster cross builds via distcc"),
    ];
    for (tool, purpose) in &optional {
        checks.push(check_tool(tool, purpose, false));
    }

    if Path::new("/dev/kvm").exists() {
        checks.push(CheckResult::pass_with("/dev/kvm", "hardware acceleration".into()));
    } else {
        checks.push(CheckResult::warn(
            "/dev/kvm",
            "not available; VM runs will be emulated".into(),
        ));
    }

    match std::fs::create_dir_all(&config.work) {
        Ok(()) => checks.push(CheckResult::pass_with(
            "work directory",
            config.work.display().to_string(),
        )),
        Err(err) => checks.push(CheckResult::fail(
            "work directory",
            format!("{} not writable: {err}", config.work.display()),
        )),
    }

    PreflightReport { checks }
}
