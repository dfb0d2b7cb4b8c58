//! Distributed-compilation daemon control.
//!
//! In distcc cross mode the foreign buildroot delegates compilation to a
//! daemon running in the native environment, keyed by target architecture
//! and port. Starting it twice for the same architecture is a no-op.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use tracing::{debug, info};

use crate::arch::{Arch, Suffix};
use crate::chroot::ChrootOps;

pub trait DistccDaemon {
    /// Ensure a daemon serving `arch` is listening on `port`. Idempotent.
    fn ensure_running(&self, arch: &Arch, port: u16) -> Result<()>;
}

/// Runs distccd inside the native environment.
pub struct LocalDistccd<'a> {
    chroot: &'a dyn ChrootOps,
    started: Mutex<HashSet<(Arch, u16)>>,
}

impl<'a> LocalDistccd<'a> {
    pub fn new(chroot: &'a dyn ChrootOps) -> Self {
        LocalDistccd {
            chroot,
            started: Mutex::new(HashSet::new()),
        }
    }
}

impl DistccDaemon for LocalDistccd<'_> {
    fn ensure_running(&self, arch: &Arch, port: u16) -> Result<()> {
        {
            let started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            if started.contains(&(arch.clone(), port)) {
                debug!("distccd for {arch} already running on port {port}");
                return Ok(());
            }
        }

        info!("(native) start distccd for {arch} on 127.0.0.1:{port}");
        self.chroot.install(&["distcc".to_string()], &Suffix::Native, false)?;
        let pid_file = format!("/var/run/distccd-{arch}.pid");
        // The pid-file test keeps this idempotent across separate
        // crossforge invocations sharing one work directory.
        let start = format!(
            "test -f {pid_file} || distccd --daemon --pid-file {pid_file} \
             --listen 127.0.0.1 --port {port} --allow 127.0.0.1",
        );
        self.chroot.run_root(
            &["sh".to_string(), "-c".to_string(), start],
            &Suffix::Native,
        )?;

        let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
        started.insert((arch.clone(), port));
        Ok(())
    }
}
