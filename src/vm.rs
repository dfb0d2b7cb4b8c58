//! Boot a built system image in qemu.
//!
//! Not part of the build core: no recursion, no environment mutation. The
//! qemu argv is composed by a pure function so the per-architecture machine
//! wiring stays testable without a qemu install.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::arch::Arch;
use crate::process::{require_tool, Cmd};

/// What to boot and how.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub arch: Arch,
    pub image: PathBuf,
    pub kernel: Option<PathBuf>,
    pub initramfs: Option<PathBuf>,
    pub cmdline: String,
    pub memory_mb: u32,
    /// Host port forwarded to the guest's SSH port.
    pub ssh_port: u16,
}

/// Compose the qemu argv for `opts`. KVM is only usable when the host can
/// hand out /dev/kvm and the guest architecture equals the host's.
pub fn qemu_command(opts: &VmOptions, native: &Arch, kvm_available: bool) -> Result<Vec<String>> {
    let Some(system) = opts.arch.qemu_system() else {
        bail!("no qemu system emulator known for architecture '{}'", opts.arch);
    };
    let mut cmd = vec![format!("qemu-system-{system}")];

    if kvm_available && opts.arch == *native {
        cmd.push("-enable-kvm".to_string());
    }

    match opts.arch.as_str() {
        "x86_64" | "x86" => {
            cmd.extend(["-serial".into(), "mon:stdio".into()]);
            cmd.extend([
                "-drive".into(),
                format!("file={},format=raw,if=virtio", opts.image.display()),
            ]);
        }
        "aarch64" => {
            cmd.extend(["-M".into(), "virt".into(), "-cpu".into(), "cortex-a57".into()]);
            cmd.extend([
                "-drive".into(),
                format!("file={},format=raw,if=none,id=drive0", opts.image.display()),
                "-device".into(),
                "virtio-blk-device,drive=drive0".into(),
            ]);
        }
        "armhf" => {
            cmd.extend(["-M".into(), "vexpress-a9".into()]);
            cmd.extend([
                "-drive".into(),
                format!("file={},format=raw,if=sd", opts.image.display()),
            ]);
        }
        other => bail!("no machine configuration known for architecture '{other}'"),
    }

    if let Some(kernel) = &opts.kernel {
        cmd.extend(["-kernel".into(), kernel.display().to_string()]);
    }
    if let Some(initramfs) = &opts.initramfs {
        cmd.extend(["-initrd".into(), initramfs.display().to_string()]);
    }
    if !opts.cmdline.is_empty() {
        cmd.extend(["-append".into(), opts.cmdline.clone()]);
    }

    cmd.extend(["-m".into(), format!("{}M", opts.memory_mb)]);
    cmd.extend([
        "-netdev".into(),
        format!("user,id=net0,hostfwd=tcp::{}-:22", opts.ssh_port),
        "-device".into(),
        "virtio-net-pci,netdev=net0".into(),
    ]);
    cmd.push("-nographic".into());
    Ok(cmd)
}

/// Launch qemu and stay attached until the guest exits.
pub fn run(opts: &VmOptions) -> Result<()> {
    if !opts.image.exists() {
        bail!("image not found at {}", opts.image.display());
    }
    let native = Arch::native();
    let kvm = Path::new("/dev/kvm").exists();
    let cmd = qemu_command(opts, &native, kvm)?;
    require_tool(&cmd[0])?;

    info!(
        "boot {} for {} (ssh forwarded to localhost:{})",
        opts.image.display(),
        opts.arch,
        opts.ssh_port
    );
    Cmd::new(&cmd[0])
        .args(&cmd[1..])
        .error_msg("qemu exited with an error")
        .run_interactive()
        .context("failed to launch qemu")?;
    Ok(())
}
