//! Capsicum syscalls on the running kernel.
//!
//! Only FreeBSD provides `cap_enter` and friends. Elsewhere the capability
//! calls fail with `ENOSYS`; the path-based calls work everywhere.

use super::Kernel;
use crate::rights::codec::PackedRights;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::ffi::CStr;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

#[cfg(target_os = "freebsd")]
mod ffi {
    use crate::rights::codec::PackedRights;

    extern "C" {
        pub fn cap_enter() -> libc::c_int;
        pub fn cap_getmode(modep: *mut libc::c_uint) -> libc::c_int;
        pub fn cap_rights_limit(fd: libc::c_int, rights: *const PackedRights) -> libc::c_int;
        // cap_rights_get(3) is a macro over this symbol.
        pub fn __cap_rights_get(
            version: libc::c_int,
            fd: libc::c_int,
            rights: *mut PackedRights,
        ) -> libc::c_int;
    }
}

/// The kernel this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostKernel;

impl HostKernel {
    pub fn new() -> Self {
        Self
    }

    /// Whether this build talks to a Capsicum-capable kernel at all.
    pub fn supports_capsicum() -> bool {
        cfg!(target_os = "freebsd")
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "freebsd"))]
fn unsupported<T>() -> io::Result<T> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

impl Kernel for HostKernel {
    #[cfg(target_os = "freebsd")]
    fn cap_enter(&self) -> io::Result<()> {
        // SAFETY: cap_enter(2) takes no arguments and only changes process state.
        check(unsafe { ffi::cap_enter() })
    }

    #[cfg(not(target_os = "freebsd"))]
    fn cap_enter(&self) -> io::Result<()> {
        unsupported()
    }

    #[cfg(target_os = "freebsd")]
    fn cap_getmode(&self) -> io::Result<bool> {
        let mut mode: libc::c_uint = 0;
        // SAFETY: `mode` is a valid, writable c_uint for the duration of the call.
        check(unsafe { ffi::cap_getmode(&mut mode) })?;
        Ok(mode != 0)
    }

    #[cfg(not(target_os = "freebsd"))]
    fn cap_getmode(&self) -> io::Result<bool> {
        unsupported()
    }

    #[cfg(target_os = "freebsd")]
    fn cap_rights_limit(&self, fd: RawFd, rights: &PackedRights) -> io::Result<()> {
        // SAFETY: PackedRights is #[repr(C)] with the cap_rights_t layout and
        // outlives the call; the kernel only reads it.
        check(unsafe { ffi::cap_rights_limit(fd, rights as *const PackedRights) })
    }

    #[cfg(not(target_os = "freebsd"))]
    fn cap_rights_limit(&self, _fd: RawFd, _rights: &PackedRights) -> io::Result<()> {
        unsupported()
    }

    #[cfg(target_os = "freebsd")]
    fn cap_rights_get(&self, fd: RawFd) -> io::Result<PackedRights> {
        use crate::rights::codec::CAP_RIGHTS_VERSION;

        let mut rights = PackedRights::empty();
        // SAFETY: `rights` is a writable cap_rights_t sized for CAP_RIGHTS_VERSION.
        check(unsafe {
            ffi::__cap_rights_get(CAP_RIGHTS_VERSION as libc::c_int, fd, &mut rights)
        })?;
        Ok(rights)
    }

    #[cfg(not(target_os = "freebsd"))]
    fn cap_rights_get(&self, _fd: RawFd) -> io::Result<PackedRights> {
        unsupported()
    }

    fn openat(&self, dirfd: RawFd, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        openat_raw(dirfd, path, flags, mode)
    }

    fn open(&self, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        open_raw(path, flags, mode)
    }

    fn mkdir(&self, path: &CStr, mode: Mode) -> io::Result<()> {
        mkdir_raw(path, mode)
    }
}

fn owned(fd: libc::c_int) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn openat_raw(dirfd: RawFd, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
    // SAFETY: `path` is NUL-terminated; the mode argument is read only with O_CREAT.
    let fd = unsafe {
        libc::openat(
            dirfd,
            path.as_ptr(),
            (flags | OFlag::O_CLOEXEC).bits(),
            mode.bits() as libc::c_uint,
        )
    };
    owned(fd)
}

pub(crate) fn open_raw(path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
    // SAFETY: as for openat_raw.
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            (flags | OFlag::O_CLOEXEC).bits(),
            mode.bits() as libc::c_uint,
        )
    };
    owned(fd)
}

pub(crate) fn mkdir_raw(path: &CStr, mode: Mode) -> io::Result<()> {
    // SAFETY: `path` is NUL-terminated.
    check(unsafe { libc::mkdir(path.as_ptr(), mode.bits()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::fd::AsRawFd;

    #[cfg(not(target_os = "freebsd"))]
    #[test]
    fn capability_calls_report_enosys_without_capsicum() {
        let kernel = HostKernel::new();
        assert!(!HostKernel::supports_capsicum());
        assert_eq!(kernel.cap_enter().unwrap_err().raw_os_error(), Some(libc::ENOSYS));
        assert_eq!(kernel.cap_getmode().unwrap_err().raw_os_error(), Some(libc::ENOSYS));
        assert_eq!(kernel.cap_rights_get(0).unwrap_err().raw_os_error(), Some(libc::ENOSYS));
    }

    #[test]
    fn path_calls_reach_the_filesystem() {
        let dir = std::env::temp_dir().join(format!("capbox-host-{}", uuid::Uuid::new_v4()));
        let dir_c = CString::new(dir.to_str().unwrap()).unwrap();
        let kernel = HostKernel::new();

        kernel.mkdir(&dir_c, Mode::from_bits_truncate(0o700)).unwrap();
        let dirfd = kernel
            .open(&dir_c, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
            .unwrap();
        let name = CString::new("probe").unwrap();
        let file = kernel
            .openat(
                dirfd.as_raw_fd(),
                &name,
                OFlag::O_WRONLY | OFlag::O_CREAT,
                Mode::from_bits_truncate(0o600),
            )
            .unwrap();
        drop(file);
        assert!(dir.join("probe").exists());

        let missing = CString::new("missing").unwrap();
        let err = kernel
            .openat(dirfd.as_raw_fd(), &missing, OFlag::O_RDONLY, Mode::empty())
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
