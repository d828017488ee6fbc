//! Symlink-safe recursive removal of scenario directories.
//!
//! A scenario child may leave anything behind in its directory, including
//! symlinks pointing out of it. Removal walks the tree with
//! `openat`/`fstatat`/`unlinkat` relative to directory descriptors and never
//! follows a link or crosses onto another filesystem.

use crate::config::types::{CapsicumError, Result};
use nix::errno::Errno;
use std::ffi::{CStr, CString};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const DIR_FLAGS: libc::c_int =
    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

/// The parent is the configured temp root and may itself be a symlink.
const PARENT_FLAGS: libc::c_int = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;

fn fail(what: impl std::fmt::Display, err: io::Error) -> CapsicumError {
    CapsicumError::Io(io::Error::new(err.kind(), format!("{}: {}", what, err)))
}

fn cstring(bytes: &[u8], path: &Path) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        CapsicumError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path contains NUL byte: {}", path.display()),
        ))
    })
}

fn open_dir_at(parent: Option<RawFd>, name: &CStr) -> io::Result<OwnedFd> {
    // SAFETY: `name` is NUL-terminated; `parent` is a live directory fd when given.
    let fd = unsafe {
        match parent {
            Some(dirfd) => libc::openat(dirfd, name.as_ptr(), DIR_FLAGS),
            None => libc::open(name.as_ptr(), PARENT_FLAGS),
        }
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: freshly opened, not owned elsewhere.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn lstat_at(dirfd: RawFd, name: &CStr) -> io::Result<libc::stat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    // SAFETY: `st` is writable and sized for struct stat.
    let rc = unsafe {
        libc::fstatat(dirfd, name.as_ptr(), st.as_mut_ptr(), libc::AT_SYMLINK_NOFOLLOW)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstatat filled it in.
    Ok(unsafe { st.assume_init() })
}

fn unlink_at(dirfd: RawFd, name: &CStr, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: `name` is NUL-terminated.
    if unsafe { libc::unlinkat(dirfd, name.as_ptr(), flags) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_dir(st: &libc::stat) -> bool {
    st.st_mode & libc::S_IFMT == libc::S_IFDIR
}

/// Entry names of the directory behind `dirfd`, `.` and `..` excluded.
fn entries(dirfd: RawFd) -> io::Result<Vec<CString>> {
    // fdopendir takes ownership of the descriptor it is given.
    // SAFETY: dup of a live fd.
    let iter_fd = unsafe { libc::dup(dirfd) };
    if iter_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `iter_fd` is a directory descriptor we own.
    let dir = unsafe { libc::fdopendir(iter_fd) };
    if dir.is_null() {
        let err = io::Error::last_os_error();
        // SAFETY: fdopendir failed, so `iter_fd` is still ours.
        unsafe { libc::close(iter_fd) };
        return Err(err);
    }

    let mut names = Vec::new();
    let result = loop {
        Errno::clear();
        // SAFETY: `dir` is a valid DIR* until closedir below.
        let entry = unsafe { libc::readdir(dir) };
        if entry.is_null() {
            let errno = Errno::last_raw();
            break if errno == 0 {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(errno))
            };
        }
        // SAFETY: d_name is NUL-terminated and lives until the next readdir.
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        if !matches!(name.to_bytes(), b"." | b"..") {
            names.push(name.to_owned());
        }
    };
    // SAFETY: closes `dir` and `iter_fd` with it.
    unsafe { libc::closedir(dir) };
    result.map(|()| names)
}

fn empty_dir(dirfd: RawFd, root_dev: libc::dev_t, path: &Path) -> Result<()> {
    for name in entries(dirfd).map_err(|e| fail(format!("readdir {}", path.display()), e))? {
        let child = path.join(std::ffi::OsStr::from_bytes(name.to_bytes()));
        let st = lstat_at(dirfd, &name).map_err(|e| fail(format!("fstatat {}", child.display()), e))?;
        let removed = if is_dir(&st) {
            if st.st_dev != root_dev {
                return Err(CapsicumError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("refusing to cross filesystem boundary at {}", child.display()),
                )));
            }
            let child_fd = open_dir_at(Some(dirfd), &name)
                .map_err(|e| fail(format!("openat {}", child.display()), e))?;
            empty_dir(child_fd.as_raw_fd(), root_dev, &child)?;
            unlink_at(dirfd, &name, libc::AT_REMOVEDIR)
        } else {
            unlink_at(dirfd, &name, 0)
        };
        removed.map_err(|e| fail(format!("unlinkat {}", child.display()), e))?;
    }
    Ok(())
}

/// Remove `path` and everything below it without following symlinks.
///
/// A missing `path` is reported as an `Io` error of kind `NotFound`, so
/// callers decide whether "already gone" counts as success.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path.file_name().ok_or_else(|| {
        CapsicumError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot remove path without file name: {}", path.display()),
        ))
    })?;
    let parent_c = cstring(parent.as_os_str().as_bytes(), path)?;
    let name_c = cstring(name.as_bytes(), path)?;

    let parent_fd = open_dir_at(None, &parent_c)
        .map_err(|e| fail(format!("open {}", parent.display()), e))?;
    let st = lstat_at(parent_fd.as_raw_fd(), &name_c)
        .map_err(|e| fail(format!("fstatat {}", path.display()), e))?;

    let removed = if is_dir(&st) {
        let dir_fd = open_dir_at(Some(parent_fd.as_raw_fd()), &name_c)
            .map_err(|e| fail(format!("openat {}", path.display()), e))?;
        empty_dir(dir_fd.as_raw_fd(), st.st_dev, path)?;
        unlink_at(parent_fd.as_raw_fd(), &name_c, libc::AT_REMOVEDIR)
    } else {
        unlink_at(parent_fd.as_raw_fd(), &name_c, 0)
    };
    removed.map_err(|e| fail(format!("unlinkat {}", path.display()), e))?;

    log::debug!("Removed {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("capbox-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir(&dir).unwrap();
        dir
    }

    #[test]
    fn removes_nested_tree() {
        let root = scratch("tree");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/file"), b"x").unwrap();
        fs::write(root.join("top"), b"y").unwrap();

        remove_tree_secure(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn does_not_follow_symlinks_out_of_the_tree() {
        let outside = scratch("outside");
        fs::write(outside.join("keep"), b"precious").unwrap();

        let root = scratch("links");
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();
        remove_tree_secure(&root).unwrap();

        assert!(!root.exists());
        assert_eq!(fs::read(outside.join("keep")).unwrap(), b"precious");
        remove_tree_secure(&outside).unwrap();
    }

    #[test]
    fn symlinked_parent_is_followed() {
        let real = scratch("real-root");
        let alias = std::env::temp_dir().join(format!("capbox-alias-{}", uuid::Uuid::new_v4()));
        std::os::unix::fs::symlink(&real, &alias).unwrap();
        fs::create_dir_all(real.join("run/inner")).unwrap();

        remove_tree_secure(&alias.join("run")).unwrap();
        assert!(!real.join("run").exists());

        // The entry itself is still never followed: only the link goes.
        remove_tree_secure(&alias).unwrap();
        assert!(fs::symlink_metadata(&alias).is_err());
        assert!(real.exists());
        remove_tree_secure(&real).unwrap();
    }

    #[test]
    fn missing_path_is_not_found() {
        let root = scratch("gone");
        remove_tree_secure(&root).unwrap();
        match remove_tree_secure(&root) {
            Err(CapsicumError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
