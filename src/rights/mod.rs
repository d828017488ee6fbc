//! Capsicum capability rights.
//!
//! [`Right`] names one kernel right; [`RightsSet`] is the in-memory
//! `cap_rights_t` built from them. Nothing in this module touches the kernel:
//! applying a set to a descriptor goes through [`crate::sandbox::ProcessContext`].

pub mod codec;
pub mod composite;

use crate::config::types::{CapsicumError, Result};
use codec::{capright, PackedRights, PAYLOAD_MASK};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single Capsicum right, numbered as in FreeBSD `sys/capsicum.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Right {
    // word 0
    Read,
    Write,
    SeekTell,
    Seek,
    Mmap,
    MmapX,
    Create,
    Fexecve,
    Fsync,
    Ftruncate,
    Lookup,
    Fchdir,
    Fchflags,
    Fchmod,
    Fchown,
    Fcntl,
    Flock,
    Fpathconf,
    Fsck,
    Fstat,
    Fstatfs,
    Futimes,
    LinkatTarget,
    Mkdirat,
    Mkfifoat,
    Mknodat,
    RenameatSource,
    Symlinkat,
    Unlinkat,
    Accept,
    Bind,
    Connect,
    Getpeername,
    Getsockname,
    Getsockopt,
    Listen,
    Peeloff,
    Setsockopt,
    Shutdown,
    Bindat,
    Connectat,
    LinkatSource,
    RenameatTarget,
    // word 1
    MacGet,
    MacSet,
    SemGetvalue,
    SemPost,
    SemWait,
    Event,
    KqueueEvent,
    Ioctl,
    Ttyhook,
    Pdgetpid,
    Pdwait,
    Pdkill,
    ExtattrDelete,
    ExtattrGet,
    ExtattrList,
    ExtattrSet,
    AclCheck,
    AclDelete,
    AclGet,
    AclSet,
    KqueueChange,
}

impl Right {
    pub const ALL: [Right; 64] = [
        Right::Read,
        Right::Write,
        Right::SeekTell,
        Right::Seek,
        Right::Mmap,
        Right::MmapX,
        Right::Create,
        Right::Fexecve,
        Right::Fsync,
        Right::Ftruncate,
        Right::Lookup,
        Right::Fchdir,
        Right::Fchflags,
        Right::Fchmod,
        Right::Fchown,
        Right::Fcntl,
        Right::Flock,
        Right::Fpathconf,
        Right::Fsck,
        Right::Fstat,
        Right::Fstatfs,
        Right::Futimes,
        Right::LinkatTarget,
        Right::Mkdirat,
        Right::Mkfifoat,
        Right::Mknodat,
        Right::RenameatSource,
        Right::Symlinkat,
        Right::Unlinkat,
        Right::Accept,
        Right::Bind,
        Right::Connect,
        Right::Getpeername,
        Right::Getsockname,
        Right::Getsockopt,
        Right::Listen,
        Right::Peeloff,
        Right::Setsockopt,
        Right::Shutdown,
        Right::Bindat,
        Right::Connectat,
        Right::LinkatSource,
        Right::RenameatTarget,
        Right::MacGet,
        Right::MacSet,
        Right::SemGetvalue,
        Right::SemPost,
        Right::SemWait,
        Right::Event,
        Right::KqueueEvent,
        Right::Ioctl,
        Right::Ttyhook,
        Right::Pdgetpid,
        Right::Pdwait,
        Right::Pdkill,
        Right::ExtattrDelete,
        Right::ExtattrGet,
        Right::ExtattrList,
        Right::ExtattrSet,
        Right::AclCheck,
        Right::AclDelete,
        Right::AclGet,
        Right::AclSet,
        Right::KqueueChange,
    ];

    /// Kernel constant, index tag and implied bits included.
    pub const fn value(self) -> u64 {
        const LOOKUP: u64 = 0x400;
        const SEEK: u64 = 0x4 | 0x8;
        match self {
            Right::Read => capright(0, 0x1),
            Right::Write => capright(0, 0x2),
            Right::SeekTell => capright(0, 0x4),
            Right::Seek => capright(0, SEEK),
            Right::Mmap => capright(0, 0x10),
            Right::MmapX => capright(0, 0x10 | SEEK | 0x20),
            Right::Create => capright(0, 0x40),
            Right::Fexecve => capright(0, 0x80),
            Right::Fsync => capright(0, 0x100),
            Right::Ftruncate => capright(0, 0x200),
            Right::Lookup => capright(0, LOOKUP),
            Right::Fchdir => capright(0, 0x800),
            Right::Fchflags => capright(0, 0x1000),
            Right::Fchmod => capright(0, 0x2000),
            Right::Fchown => capright(0, 0x4000),
            Right::Fcntl => capright(0, 0x8000),
            Right::Flock => capright(0, 0x10000),
            Right::Fpathconf => capright(0, 0x20000),
            Right::Fsck => capright(0, 0x40000),
            Right::Fstat => capright(0, 0x80000),
            Right::Fstatfs => capright(0, 0x100000),
            Right::Futimes => capright(0, 0x200000),
            Right::LinkatTarget => capright(0, LOOKUP | 0x400000),
            Right::Mkdirat => capright(0, LOOKUP | 0x800000),
            Right::Mkfifoat => capright(0, LOOKUP | 0x1000000),
            Right::Mknodat => capright(0, LOOKUP | 0x2000000),
            Right::RenameatSource => capright(0, LOOKUP | 0x4000000),
            Right::Symlinkat => capright(0, LOOKUP | 0x8000000),
            Right::Unlinkat => capright(0, LOOKUP | 0x10000000),
            Right::Accept => capright(0, 0x20000000),
            Right::Bind => capright(0, 0x40000000),
            Right::Connect => capright(0, 0x80000000),
            Right::Getpeername => capright(0, 0x100000000),
            Right::Getsockname => capright(0, 0x200000000),
            Right::Getsockopt => capright(0, 0x400000000),
            Right::Listen => capright(0, 0x800000000),
            Right::Peeloff => capright(0, 0x1000000000),
            Right::Setsockopt => capright(0, 0x2000000000),
            Right::Shutdown => capright(0, 0x4000000000),
            Right::Bindat => capright(0, LOOKUP | 0x8000000000),
            Right::Connectat => capright(0, LOOKUP | 0x10000000000),
            Right::LinkatSource => capright(0, LOOKUP | 0x20000000000),
            Right::RenameatTarget => capright(0, LOOKUP | 0x40000000000),
            Right::MacGet => capright(1, 0x1),
            Right::MacSet => capright(1, 0x2),
            Right::SemGetvalue => capright(1, 0x4),
            Right::SemPost => capright(1, 0x8),
            Right::SemWait => capright(1, 0x10),
            Right::Event => capright(1, 0x20),
            Right::KqueueEvent => capright(1, 0x40),
            Right::Ioctl => capright(1, 0x80),
            Right::Ttyhook => capright(1, 0x100),
            Right::Pdgetpid => capright(1, 0x200),
            Right::Pdwait => capright(1, 0x400),
            Right::Pdkill => capright(1, 0x800),
            Right::ExtattrDelete => capright(1, 0x1000),
            Right::ExtattrGet => capright(1, 0x2000),
            Right::ExtattrList => capright(1, 0x4000),
            Right::ExtattrSet => capright(1, 0x8000),
            Right::AclCheck => capright(1, 0x10000),
            Right::AclDelete => capright(1, 0x20000),
            Right::AclGet => capright(1, 0x40000),
            Right::AclSet => capright(1, 0x80000),
            Right::KqueueChange => capright(1, 0x100000),
        }
    }

    pub fn word(self) -> usize {
        match self {
            Right::MacGet
            | Right::MacSet
            | Right::SemGetvalue
            | Right::SemPost
            | Right::SemWait
            | Right::Event
            | Right::KqueueEvent
            | Right::Ioctl
            | Right::Ttyhook
            | Right::Pdgetpid
            | Right::Pdwait
            | Right::Pdkill
            | Right::ExtattrDelete
            | Right::ExtattrGet
            | Right::ExtattrList
            | Right::ExtattrSet
            | Right::AclCheck
            | Right::AclDelete
            | Right::AclGet
            | Right::AclSet
            | Right::KqueueChange => 1,
            _ => 0,
        }
    }

    /// Rights whose bits are part of this right's kernel value.
    pub fn implied(self) -> &'static [Right] {
        match self {
            Right::Seek => &[Right::SeekTell],
            Right::MmapX => &[Right::Mmap, Right::Seek, Right::SeekTell],
            Right::LinkatTarget
            | Right::Mkdirat
            | Right::Mkfifoat
            | Right::Mknodat
            | Right::RenameatSource
            | Right::Symlinkat
            | Right::Unlinkat
            | Right::Bindat
            | Right::Connectat
            | Right::LinkatSource
            | Right::RenameatTarget => &[Right::Lookup],
            _ => &[],
        }
    }

    /// The single payload bit no other right owns.
    pub fn own_bit(self) -> u64 {
        let inherited = self
            .implied()
            .iter()
            .fold(0, |acc, right| acc | right.value());
        self.value() & PAYLOAD_MASK & !inherited
    }

    /// This right plus everything it implies.
    pub fn closure(self) -> BTreeSet<Right> {
        std::iter::once(self).chain(self.implied().iter().copied()).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            Right::Read => "CAP_READ",
            Right::Write => "CAP_WRITE",
            Right::SeekTell => "CAP_SEEK_TELL",
            Right::Seek => "CAP_SEEK",
            Right::Mmap => "CAP_MMAP",
            Right::MmapX => "CAP_MMAP_X",
            Right::Create => "CAP_CREATE",
            Right::Fexecve => "CAP_FEXECVE",
            Right::Fsync => "CAP_FSYNC",
            Right::Ftruncate => "CAP_FTRUNCATE",
            Right::Lookup => "CAP_LOOKUP",
            Right::Fchdir => "CAP_FCHDIR",
            Right::Fchflags => "CAP_FCHFLAGS",
            Right::Fchmod => "CAP_FCHMOD",
            Right::Fchown => "CAP_FCHOWN",
            Right::Fcntl => "CAP_FCNTL",
            Right::Flock => "CAP_FLOCK",
            Right::Fpathconf => "CAP_FPATHCONF",
            Right::Fsck => "CAP_FSCK",
            Right::Fstat => "CAP_FSTAT",
            Right::Fstatfs => "CAP_FSTATFS",
            Right::Futimes => "CAP_FUTIMES",
            Right::LinkatTarget => "CAP_LINKAT_TARGET",
            Right::Mkdirat => "CAP_MKDIRAT",
            Right::Mkfifoat => "CAP_MKFIFOAT",
            Right::Mknodat => "CAP_MKNODAT",
            Right::RenameatSource => "CAP_RENAMEAT_SOURCE",
            Right::Symlinkat => "CAP_SYMLINKAT",
            Right::Unlinkat => "CAP_UNLINKAT",
            Right::Accept => "CAP_ACCEPT",
            Right::Bind => "CAP_BIND",
            Right::Connect => "CAP_CONNECT",
            Right::Getpeername => "CAP_GETPEERNAME",
            Right::Getsockname => "CAP_GETSOCKNAME",
            Right::Getsockopt => "CAP_GETSOCKOPT",
            Right::Listen => "CAP_LISTEN",
            Right::Peeloff => "CAP_PEELOFF",
            Right::Setsockopt => "CAP_SETSOCKOPT",
            Right::Shutdown => "CAP_SHUTDOWN",
            Right::Bindat => "CAP_BINDAT",
            Right::Connectat => "CAP_CONNECTAT",
            Right::LinkatSource => "CAP_LINKAT_SOURCE",
            Right::RenameatTarget => "CAP_RENAMEAT_TARGET",
            Right::MacGet => "CAP_MAC_GET",
            Right::MacSet => "CAP_MAC_SET",
            Right::SemGetvalue => "CAP_SEM_GETVALUE",
            Right::SemPost => "CAP_SEM_POST",
            Right::SemWait => "CAP_SEM_WAIT",
            Right::Event => "CAP_EVENT",
            Right::KqueueEvent => "CAP_KQUEUE_EVENT",
            Right::Ioctl => "CAP_IOCTL",
            Right::Ttyhook => "CAP_TTYHOOK",
            Right::Pdgetpid => "CAP_PDGETPID",
            Right::Pdwait => "CAP_PDWAIT",
            Right::Pdkill => "CAP_PDKILL",
            Right::ExtattrDelete => "CAP_EXTATTR_DELETE",
            Right::ExtattrGet => "CAP_EXTATTR_GET",
            Right::ExtattrList => "CAP_EXTATTR_LIST",
            Right::ExtattrSet => "CAP_EXTATTR_SET",
            Right::AclCheck => "CAP_ACL_CHECK",
            Right::AclDelete => "CAP_ACL_DELETE",
            Right::AclGet => "CAP_ACL_GET",
            Right::AclSet => "CAP_ACL_SET",
            Right::KqueueChange => "CAP_KQUEUE_CHANGE",
        }
    }

    /// Looks up the right whose kernel constant is exactly `value`.
    pub fn from_raw(value: u64) -> Result<Right> {
        Right::ALL
            .iter()
            .copied()
            .find(|right| right.value() == value)
            .ok_or_else(|| CapsicumError::InvalidRight(format!("{value:#018x}")))
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Right {
    type Err = CapsicumError;

    /// Accepts `CAP_READ`, `READ` or `read`.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let wanted = upper.strip_prefix("CAP_").unwrap_or(&upper);
        Right::ALL
            .iter()
            .copied()
            .find(|right| &right.name()[4..] == wanted)
            .ok_or_else(|| CapsicumError::InvalidRight(s.to_string()))
    }
}

impl TryFrom<String> for Right {
    type Error = CapsicumError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Right> for String {
    fn from(right: Right) -> String {
        right.name().to_string()
    }
}

/// In-memory rights set in kernel layout.
///
/// Equality compares kernel bits, so two sets are equal exactly when the
/// kernel would treat them the same.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Right>", into = "Vec<Right>")]
pub struct RightsSet {
    packed: PackedRights,
}

impl RightsSet {
    /// `cap_rights_init`: exactly `rights` (and what they imply).
    pub fn new(rights: &[Right]) -> Self {
        Self {
            packed: codec::encode(rights.iter().copied()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Every known right; what a freshly opened descriptor carries.
    pub fn all() -> Self {
        Self::new(&Right::ALL)
    }

    /// Parse right or composite names, failing on the first unknown one.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut set = Self::empty();
        for name in names {
            let name = name.as_ref();
            match name.parse::<Right>() {
                Ok(right) => set.set(&[right]),
                Err(err) => match composite::lookup(name) {
                    Some(rights) => set.set(rights),
                    None => return Err(err),
                },
            };
        }
        Ok(set)
    }

    pub fn from_packed(packed: PackedRights) -> Result<Self> {
        packed.validate()?;
        Ok(Self { packed })
    }

    pub fn packed(&self) -> &PackedRights {
        &self.packed
    }

    /// `cap_rights_set`: add `rights`.
    pub fn set(&mut self, rights: &[Right]) -> &mut Self {
        for right in rights {
            self.packed.insert(*right);
        }
        self
    }

    /// `cap_rights_clear`: drop `rights`. Clearing an absent right is a no-op.
    ///
    /// Composites that depended on a cleared right go with it; what they
    /// implied stays.
    pub fn clear(&mut self, rights: &[Right]) -> &mut Self {
        for right in rights {
            self.packed.remove_own(*right);
        }
        self.packed.drop_orphans();
        self
    }

    /// `cap_rights_is_set`: true iff every right in `rights` is present.
    pub fn is_set(&self, rights: &[Right]) -> bool {
        rights.iter().all(|right| self.packed.has(*right))
    }

    pub fn contains(&self, right: Right) -> bool {
        self.packed.has(right)
    }

    /// True iff every right of `other` is also in `self`.
    pub fn contains_all(&self, other: &RightsSet) -> bool {
        self.packed.contains(&other.packed)
    }

    pub fn merge(&mut self, other: &RightsSet) -> &mut Self {
        self.packed.merge(&other.packed);
        self
    }

    pub fn remove(&mut self, other: &RightsSet) -> &mut Self {
        self.packed.remove(&other.packed);
        self.packed.drop_orphans();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Right> + '_ {
        Right::ALL
            .iter()
            .copied()
            .filter(move |right| self.packed.has(*right))
    }

    pub fn to_vec(&self) -> Vec<Right> {
        self.iter().collect()
    }
}

impl FromIterator<Right> for RightsSet {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        Self {
            packed: codec::encode(iter),
        }
    }
}

impl From<Vec<Right>> for RightsSet {
    fn from(rights: Vec<Right>) -> Self {
        Self::new(&rights)
    }
}

impl From<RightsSet> for Vec<Right> {
    fn from(set: RightsSet) -> Vec<Right> {
        set.to_vec()
    }
}

impl fmt::Debug for RightsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RightsSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(Right::name).collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for RightsSet {
    type Err = CapsicumError;

    /// Parses `CAP_READ|CAP_LOOKUP`, `read,lookup` or `none`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::empty());
        }
        let names: Vec<&str> = trimmed
            .split(|c| c == ',' || c == '|')
            .filter(|part| !part.trim().is_empty())
            .collect();
        Self::from_names(&names)
    }
}
