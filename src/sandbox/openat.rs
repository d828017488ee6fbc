//! Directory-relative opens, the file access that survives `cap_enter`.
//!
//! In capability mode the only way to reach the filesystem is through a
//! descriptor already held; the kernel checks the directory's rights against
//! what the open asks for (see [`open_rights`]).

use super::ProcessContext;
use crate::config::types::{CapsicumError, Result, Syscall};
use crate::kernel::{classify, Kernel};
use crate::rights::{Right, RightsSet};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Rights an `openat` with `flags` needs on its directory descriptor.
pub fn open_rights(flags: OFlag) -> RightsSet {
    let mut rights = RightsSet::new(&[Right::Lookup]);
    let access = flags & OFlag::O_ACCMODE;
    if access == OFlag::O_WRONLY {
        rights.set(&[Right::Write]);
    } else if access == OFlag::O_RDWR {
        rights.set(&[Right::Read, Right::Write]);
    } else {
        rights.set(&[Right::Read]);
    }
    if flags.contains(OFlag::O_CREAT) {
        rights.set(&[Right::Create]);
    }
    if flags.contains(OFlag::O_TRUNC) {
        rights.set(&[Right::Ftruncate]);
    }
    if flags.contains(OFlag::O_SYNC) {
        rights.set(&[Right::Fsync]);
    }
    rights
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        CapsicumError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path contains NUL byte: {}", path.display()),
        ))
    })
}

impl<K: Kernel> ProcessContext<K> {
    /// `openat(base, path)`. Never consults the ambient filesystem root; the
    /// base descriptor's rights must cover [`open_rights`] for `flags`.
    pub fn open_relative<F: AsRawFd, P: AsRef<Path>>(
        &self,
        base: &F,
        path: P,
        flags: OFlag,
        mode: Mode,
    ) -> Result<OwnedFd> {
        let path = path.as_ref();
        let path_c = path_to_cstring(path)?;
        let fd = self
            .kernel()
            .openat(base.as_raw_fd(), &path_c, flags, mode)
            .map_err(|e| classify(Syscall::OpenAt, e))?;
        log::debug!(
            "openat({}, {}) -> fd {}",
            base.as_raw_fd(),
            path.display(),
            fd.as_raw_fd()
        );
        Ok(fd)
    }

    /// [`open_relative`](Self::open_relative) returning a [`File`].
    pub fn open_file_at<F: AsRawFd, P: AsRef<Path>>(
        &self,
        base: &F,
        path: P,
        flags: OFlag,
        mode: Mode,
    ) -> Result<File> {
        self.open_relative(base, path, flags, mode).map(File::from)
    }

    /// Path-based open. Fails with `NotCapable` once in capability mode.
    pub fn open_ambient<P: AsRef<Path>>(&self, path: P, flags: OFlag, mode: Mode) -> Result<OwnedFd> {
        let path_c = path_to_cstring(path.as_ref())?;
        self.kernel()
            .open(&path_c, flags, mode)
            .map_err(|e| classify(Syscall::Open, e))
    }

    /// Path-based mkdir. Fails once in capability mode (`NotCapable`, or
    /// `PermissionDenied` on kernels that report `EPERM`).
    pub fn create_dir_ambient<P: AsRef<Path>>(&self, path: P, mode: Mode) -> Result<()> {
        let path_c = path_to_cstring(path.as_ref())?;
        self.kernel()
            .mkdir(&path_c, mode)
            .map_err(|e| classify(Syscall::Mkdir, e))
    }
}
