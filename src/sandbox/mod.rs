//! Process-scoped capability state.
//!
//! [`ProcessContext`] carries the one-way `Normal -> CapabilityMode` tag and
//! is the only entry point for operations whose behavior depends on it:
//! entering capability mode, limiting and reading descriptor rights, and the
//! path-based and directory-relative opens in [`openat`].

pub mod openat;

use crate::config::types::{CapabilityMode, CapsicumError, Result, Syscall};
use crate::kernel::{classify, HostKernel, Kernel};
use crate::rights::RightsSet;
use std::os::fd::AsRawFd;

pub use openat::open_rights;

/// Capability state of the current process plus the kernel it runs on.
///
/// There is no way back to `Normal`: the kernel offers none, and neither does
/// this type.
#[derive(Debug)]
pub struct ProcessContext<K: Kernel = HostKernel> {
    kernel: K,
    mode: CapabilityMode,
}

/// Ask the kernel whether the calling process is already sandboxed.
pub fn query_mode<K: Kernel>(kernel: &K) -> Result<CapabilityMode> {
    match kernel.cap_getmode() {
        Ok(true) => Ok(CapabilityMode::CapabilityMode),
        Ok(false) => Ok(CapabilityMode::Normal),
        Err(e) => Err(classify(Syscall::CapGetMode, e)),
    }
}

impl ProcessContext<HostKernel> {
    /// Context for the running process. The mode is read from the kernel, so
    /// a child spawned from a sandboxed parent starts out sandboxed.
    pub fn host() -> Self {
        Self::with_kernel(HostKernel::new())
    }
}

impl<K: Kernel> ProcessContext<K> {
    pub fn with_kernel(kernel: K) -> Self {
        let mode = query_mode(&kernel).unwrap_or_else(|e| {
            log::debug!("{}, assuming normal mode", e);
            CapabilityMode::Normal
        });
        Self { kernel, mode }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn mode(&self) -> CapabilityMode {
        self.mode
    }

    /// Irreversibly drop ambient authority for the whole process.
    ///
    /// On failure the process is *not* sandboxed and must not carry on as if
    /// it were.
    pub fn enter(&mut self) -> Result<()> {
        if self.mode.is_sandboxed() {
            log::debug!("already in capability mode");
            return Ok(());
        }
        self.kernel
            .cap_enter()
            .map_err(CapsicumError::TransitionFailed)?;
        self.mode = CapabilityMode::CapabilityMode;
        log::info!("Entered capability mode (pid {})", std::process::id());
        Ok(())
    }

    /// Narrow `fd` to `rights`. Asking for anything outside the current
    /// effective rights is refused with `PermissionDenied` before the kernel
    /// is asked, and the kernel refuses it again if asked.
    pub fn limit<F: AsRawFd>(&self, fd: &F, rights: &RightsSet) -> Result<()> {
        let raw = fd.as_raw_fd();
        let current = self
            .kernel
            .cap_rights_get(raw)
            .map_err(|e| classify(Syscall::CapRightsLimit, e))
            .and_then(RightsSet::from_packed)?;
        if !current.contains_all(rights) {
            let excess: RightsSet = rights.iter().filter(|r| !current.contains(*r)).collect();
            return Err(CapsicumError::PermissionDenied {
                op: Syscall::CapRightsLimit,
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("fd {} cannot gain {}", raw, excess),
                ),
            });
        }
        self.kernel
            .cap_rights_limit(raw, rights.packed())
            .map_err(|e| classify(Syscall::CapRightsLimit, e))?;
        log::debug!("Limited fd {} to {}", raw, rights);
        Ok(())
    }

    /// Current effective rights of `fd`.
    pub fn rights<F: AsRawFd>(&self, fd: &F) -> Result<RightsSet> {
        let packed = self
            .kernel
            .cap_rights_get(fd.as_raw_fd())
            .map_err(|e| classify(Syscall::CapRightsGet, e))?;
        RightsSet::from_packed(packed)
    }
}
