//! User-space stand-in for a Capsicum kernel, for in-process unit tests.
//!
//! File operations hit the real filesystem; rights and capability mode are
//! tracked here and enforced with the errnos FreeBSD would return.

use super::capsicum::{mkdir_raw, open_raw, openat_raw};
use super::{Kernel, ECAPMODE, ENOTCAPABLE};
use crate::rights::codec::PackedRights;
use crate::rights::RightsSet;
use crate::sandbox::openat::open_rights;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::collections::HashMap;
use std::ffi::CStr;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Component, Path};
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    capability_mode: bool,
    enter_calls: usize,
    rights: HashMap<RawFd, PackedRights>,
}

#[derive(Default)]
pub(crate) struct FakeKernel {
    state: Mutex<FakeState>,
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn check_fd(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn escapes_directory(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::RootDir | Component::ParentDir))
}

impl FakeKernel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter_calls(&self) -> usize {
        self.state.lock().unwrap().enter_calls
    }

    fn track(&self, fd: &OwnedFd) {
        self.state
            .lock()
            .unwrap()
            .rights
            .insert(fd.as_raw_fd(), *RightsSet::all().packed());
    }

    fn current(&self, fd: RawFd) -> PackedRights {
        self.state
            .lock()
            .unwrap()
            .rights
            .get(&fd)
            .copied()
            .unwrap_or(*RightsSet::all().packed())
    }
}

impl Kernel for FakeKernel {
    fn cap_enter(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.capability_mode = true;
        state.enter_calls += 1;
        Ok(())
    }

    fn cap_getmode(&self) -> io::Result<bool> {
        Ok(self.state.lock().unwrap().capability_mode)
    }

    fn cap_rights_limit(&self, fd: RawFd, rights: &PackedRights) -> io::Result<()> {
        check_fd(fd)?;
        if !self.current(fd).contains(rights) {
            return Err(errno(ENOTCAPABLE));
        }
        self.state.lock().unwrap().rights.insert(fd, *rights);
        Ok(())
    }

    fn cap_rights_get(&self, fd: RawFd) -> io::Result<PackedRights> {
        check_fd(fd)?;
        Ok(self.current(fd))
    }

    fn openat(&self, dirfd: RawFd, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        check_fd(dirfd)?;
        let sandboxed = self.state.lock().unwrap().capability_mode;
        let relative = Path::new(path.to_str().map_err(|_| errno(libc::EINVAL))?);
        if sandboxed && escapes_directory(relative) {
            return Err(errno(ENOTCAPABLE));
        }
        if !self.current(dirfd).contains(open_rights(flags).packed()) {
            return Err(errno(ENOTCAPABLE));
        }
        let fd = openat_raw(dirfd, path, flags, mode)?;
        self.track(&fd);
        Ok(fd)
    }

    fn open(&self, path: &CStr, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
        if self.state.lock().unwrap().capability_mode {
            return Err(errno(ECAPMODE));
        }
        let fd = open_raw(path, flags, mode)?;
        self.track(&fd);
        Ok(fd)
    }

    fn mkdir(&self, path: &CStr, mode: Mode) -> io::Result<()> {
        if self.state.lock().unwrap().capability_mode {
            return Err(errno(ECAPMODE));
        }
        mkdir_raw(path, mode)
    }
}
