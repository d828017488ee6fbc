//! Kernel rights that are pure combinations of other rights.
//!
//! `sys/capsicum.h` defines these as ORs of existing constants without a bit
//! of their own, so they are exposed as right lists rather than [`Right`]s.

use super::Right;

pub const PREAD: &[Right] = &[Right::Seek, Right::Read];
pub const PWRITE: &[Right] = &[Right::Seek, Right::Write];
pub const MMAP_R: &[Right] = &[Right::Mmap, Right::Seek, Right::Read];
pub const MMAP_W: &[Right] = &[Right::Mmap, Right::Seek, Right::Write];
pub const MMAP_RW: &[Right] = &[Right::Mmap, Right::Seek, Right::Read, Right::Write];
pub const MMAP_RX: &[Right] = &[Right::MmapX, Right::Read];
pub const MMAP_WX: &[Right] = &[Right::MmapX, Right::Write];
pub const MMAP_RWX: &[Right] = &[Right::MmapX, Right::Read, Right::Write];
pub const CHFLAGSAT: &[Right] = &[Right::Fchflags, Right::Lookup];
pub const FCHMODAT: &[Right] = &[Right::Fchmod, Right::Lookup];
pub const FCHOWNAT: &[Right] = &[Right::Fchown, Right::Lookup];
pub const FSTATAT: &[Right] = &[Right::Fstat, Right::Lookup];
pub const FUTIMESAT: &[Right] = &[Right::Futimes, Right::Lookup];
pub const RECV: &[Right] = &[Right::Read];
pub const SEND: &[Right] = &[Right::Write];
pub const KQUEUE: &[Right] = &[Right::KqueueEvent, Right::KqueueChange];

pub const SOCK_CLIENT: &[Right] = &[
    Right::Connect,
    Right::Getpeername,
    Right::Getsockname,
    Right::Getsockopt,
    Right::Peeloff,
    Right::Read,
    Right::Write,
    Right::Setsockopt,
    Right::Shutdown,
];

pub const SOCK_SERVER: &[Right] = &[
    Right::Accept,
    Right::Bind,
    Right::Getpeername,
    Right::Getsockname,
    Right::Getsockopt,
    Right::Listen,
    Right::Peeloff,
    Right::Read,
    Right::Write,
    Right::Setsockopt,
    Right::Shutdown,
];

/// Named composites, for the CLI and config parsing.
pub const NAMED: &[(&str, &[Right])] = &[
    ("CAP_PREAD", PREAD),
    ("CAP_PWRITE", PWRITE),
    ("CAP_MMAP_R", MMAP_R),
    ("CAP_MMAP_W", MMAP_W),
    ("CAP_MMAP_RW", MMAP_RW),
    ("CAP_MMAP_RX", MMAP_RX),
    ("CAP_MMAP_WX", MMAP_WX),
    ("CAP_MMAP_RWX", MMAP_RWX),
    ("CAP_CHFLAGSAT", CHFLAGSAT),
    ("CAP_FCHMODAT", FCHMODAT),
    ("CAP_FCHOWNAT", FCHOWNAT),
    ("CAP_FSTATAT", FSTATAT),
    ("CAP_FUTIMESAT", FUTIMESAT),
    ("CAP_RECV", RECV),
    ("CAP_SEND", SEND),
    ("CAP_KQUEUE", KQUEUE),
    ("CAP_SOCK_CLIENT", SOCK_CLIENT),
    ("CAP_SOCK_SERVER", SOCK_SERVER),
];

/// Case-insensitive lookup, `CAP_` prefix optional.
pub fn lookup(name: &str) -> Option<&'static [Right]> {
    let upper = name.trim().to_ascii_uppercase();
    let wanted = upper.strip_prefix("CAP_").unwrap_or(&upper);
    NAMED
        .iter()
        .find(|(known, _)| &known[4..] == wanted)
        .map(|(_, rights)| *rights)
}
