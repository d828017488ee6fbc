//! Thin wrappers around the Capsicum kernel interface.
//!
//! All `unsafe` code is concentrated in [`capsicum`] with explicit SAFETY
//! comments. Everything above this layer talks to the [`Kernel`] trait and
//! receives raw `io::Error`s, which [`classify`] maps into the crate's error
//! taxonomy.

pub mod capsicum;

#[cfg(test)]
pub(crate) mod fake;

pub use capsicum::HostKernel;

use crate::config::types::{CapsicumError, Syscall};
use crate::rights::codec::PackedRights;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::ffi::CStr;
use std::io;
use std::os::fd::{OwnedFd, RawFd};

/// `ENOTCAPABLE` from FreeBSD `errno.h`: the descriptor lacks a right.
pub const ENOTCAPABLE: i32 = 93;
/// `ECAPMODE` from FreeBSD `errno.h`: not permitted in capability mode.
pub const ECAPMODE: i32 = 94;

/// The syscalls the sandbox core consumes. Implementations report failures
/// as raw OS errors and never interpret them.
pub trait Kernel {
    fn cap_enter(&self) -> io::Result<()>;

    /// `true` when the calling process is in capability mode.
    fn cap_getmode(&self) -> io::Result<bool>;

    fn cap_rights_limit(&self, fd: RawFd, rights: &PackedRights) -> io::Result<()>;

    fn cap_rights_get(&self, fd: RawFd) -> io::Result<PackedRights>;

    fn openat(&self, dirfd: RawFd, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd>;

    fn open(&self, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd>;

    fn mkdir(&self, path: &CStr, mode: Mode) -> io::Result<()>;
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn cap_enter(&self) -> io::Result<()> {
        (**self).cap_enter()
    }

    fn cap_getmode(&self) -> io::Result<bool> {
        (**self).cap_getmode()
    }

    fn cap_rights_limit(&self, fd: RawFd, rights: &PackedRights) -> io::Result<()> {
        (**self).cap_rights_limit(fd, rights)
    }

    fn cap_rights_get(&self, fd: RawFd) -> io::Result<PackedRights> {
        (**self).cap_rights_get(fd)
    }

    fn openat(&self, dirfd: RawFd, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        (**self).openat(dirfd, path, flags, mode)
    }

    fn open(&self, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        (**self).open(path, flags, mode)
    }

    fn mkdir(&self, path: &CStr, mode: Mode) -> io::Result<()> {
        (**self).mkdir(path, mode)
    }
}

/// Map an OS error from `op` into the crate taxonomy.
///
/// `ENOTCAPABLE` from `cap_rights_limit` means the new set is not a subset of
/// the current one, so it is reported as `PermissionDenied`; everywhere else
/// it is `NotCapable`.
pub fn classify(op: Syscall, err: io::Error) -> CapsicumError {
    match err.raw_os_error() {
        Some(libc::EBADF) => CapsicumError::BadDescriptor { op, source: err },
        Some(ENOTCAPABLE) if op == Syscall::CapRightsLimit => {
            CapsicumError::PermissionDenied { op, source: err }
        }
        Some(ENOTCAPABLE) | Some(ECAPMODE) => CapsicumError::NotCapable { op, source: err },
        Some(libc::EPERM) | Some(libc::EACCES) => {
            CapsicumError::PermissionDenied { op, source: err }
        }
        Some(libc::ENOSYS) => CapsicumError::Unsupported { op },
        _ => CapsicumError::Io(err),
    }
}
