//! Packed `cap_rights_t` representation.
//!
//! The kernel stores a rights set as `CAP_RIGHTS_VERSION + 2` 64-bit words:
//!
//! ```text
//!  63 62 61      57 56                                   0
//! +-----+----------+--------------------------------------+
//! | ver | index    | payload (one bit per primitive right)|
//! +-----+----------+--------------------------------------+
//! ```
//!
//! * bits 62..63 of word 0 hold the structure version; they are zero in
//!   every other word.
//! * bits 57..61 of word `i` hold the one-hot index tag `1 << i`.
//! * a right constant embeds the index tag of the word it lives in, so OR-ing
//!   a right into its word leaves the tag untouched. Clearing masks the tag
//!   out of the operand first.

use super::Right;
use crate::config::types::{CapsicumError, Result};
use std::collections::BTreeSet;
use std::fmt;

pub const CAP_RIGHTS_VERSION: u32 = 0;
pub const RIGHTS_WORDS: usize = CAP_RIGHTS_VERSION as usize + 2;

pub const VERSION_SHIFT: u32 = 62;
pub const VERSION_MASK: u64 = 0x3 << VERSION_SHIFT;
pub const INDEX_SHIFT: u32 = 57;
pub const INDEX_MASK: u64 = 0x1F << INDEX_SHIFT;
pub const PAYLOAD_MASK: u64 = 0x01FF_FFFF_FFFF_FFFF;

/// `CAPRIGHT(idx, bits)`: index tag for word `idx` plus payload bits.
pub const fn capright(idx: u32, bits: u64) -> u64 {
    (1u64 << (INDEX_SHIFT + idx)) | bits
}

/// Word a tagged value belongs to, decoded from its one-hot index tag.
pub fn word_index(value: u64) -> Result<usize> {
    let tag = (value & INDEX_MASK) >> INDEX_SHIFT;
    if !tag.is_power_of_two() {
        return Err(CapsicumError::InvalidRight(format!(
            "{value:#018x} has no single index tag"
        )));
    }
    let idx = tag.trailing_zeros() as usize;
    if idx >= RIGHTS_WORDS {
        return Err(CapsicumError::InvalidRight(format!(
            "{value:#018x} addresses word {idx}, version {CAP_RIGHTS_VERSION} has {RIGHTS_WORDS}"
        )));
    }
    Ok(idx)
}

/// Union of the payload bits of every known right in word `idx`.
pub fn known_payload(idx: usize) -> u64 {
    Right::ALL
        .iter()
        .filter(|right| right.word() == idx)
        .fold(0, |acc, right| acc | (right.value() & PAYLOAD_MASK))
}

/// Kernel-layout rights words. `#[repr(C)]` so it can be handed to
/// `cap_rights_limit` and `__cap_rights_get` directly.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedRights {
    words: [u64; RIGHTS_WORDS],
}

impl PackedRights {
    /// Equivalent of `cap_rights_init(&r)` with no rights: version and index
    /// tags only.
    pub const fn empty() -> Self {
        Self {
            words: [
                capright(0, 0) | ((CAP_RIGHTS_VERSION as u64) << VERSION_SHIFT),
                capright(1, 0),
            ],
        }
    }

    /// Adopt words produced by the kernel, rejecting anything
    /// `cap_rights_is_valid` would reject.
    pub fn from_words(words: [u64; RIGHTS_WORDS]) -> Result<Self> {
        let packed = Self { words };
        packed.validate()?;
        Ok(packed)
    }

    pub fn words(&self) -> [u64; RIGHTS_WORDS] {
        self.words
    }

    pub fn version(&self) -> u32 {
        (self.words[0] >> VERSION_SHIFT) as u32
    }

    /// Payload bits of word `idx`, tags stripped.
    pub fn payload(&self, idx: usize) -> u64 {
        self.words[idx] & PAYLOAD_MASK
    }

    pub fn is_empty(&self) -> bool {
        (0..RIGHTS_WORDS).all(|idx| self.payload(idx) == 0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version() != CAP_RIGHTS_VERSION {
            return Err(CapsicumError::MalformedRights(format!(
                "version {} (expected {})",
                self.version(),
                CAP_RIGHTS_VERSION
            )));
        }
        for (idx, word) in self.words.iter().enumerate() {
            let actual = word_index(*word)
                .map_err(|_| CapsicumError::MalformedRights(format!("word {idx} is untagged")))?;
            if actual != idx {
                return Err(CapsicumError::MalformedRights(format!(
                    "word {idx} is tagged for word {actual}"
                )));
            }
            if idx > 0 && word & VERSION_MASK != 0 {
                return Err(CapsicumError::MalformedRights(format!(
                    "word {idx} carries version bits"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, right: Right) {
        self.words[right.word()] |= right.value();
    }

    /// Removes only the bit `right` owns; bits of implied rights stay.
    pub(crate) fn remove_own(&mut self, right: Right) {
        self.words[right.word()] &= !right.own_bit();
    }

    /// Drops the own bit of every right whose implied bits are gone, so the
    /// payload again equals `encode(decode(self))` over known rights.
    /// `implied()` is transitively closed, so one pass is enough.
    pub(crate) fn drop_orphans(&mut self) {
        for right in Right::ALL {
            let own = right.own_bit();
            if self.words[right.word()] & own != 0 && !self.has(right) {
                self.words[right.word()] &= !own;
            }
        }
    }

    pub(crate) fn has(&self, right: Right) -> bool {
        let value = right.value();
        self.words[right.word()] & value == value
    }

    /// `cap_rights_merge`: union of payloads.
    pub fn merge(&mut self, other: &PackedRights) {
        for (word, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= theirs & PAYLOAD_MASK;
        }
    }

    /// `cap_rights_remove`: difference of payloads.
    pub fn remove(&mut self, other: &PackedRights) {
        for (word, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= !(theirs & PAYLOAD_MASK);
        }
    }

    /// `cap_rights_contains(self, little)`.
    pub fn contains(&self, little: &PackedRights) -> bool {
        self.words
            .iter()
            .zip(little.words.iter())
            .all(|(big, small)| big & small == *small)
    }
}

impl Default for PackedRights {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PackedRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedRights")
            .field("words", &format_args!("[{:#018x}, {:#018x}]", self.words[0], self.words[1]))
            .finish()
    }
}

/// Packs a set of rights. Implied rights come along with their composites.
pub fn encode<I: IntoIterator<Item = Right>>(rights: I) -> PackedRights {
    let mut packed = PackedRights::empty();
    for right in rights {
        packed.insert(right);
    }
    packed
}

/// Packs raw kernel right values (for example `CAP_PREAD`, which has no
/// [`Right`] of its own). Any bit outside the known rights of its word is
/// rejected.
pub fn encode_raw(values: &[u64]) -> Result<PackedRights> {
    let mut packed = PackedRights::empty();
    for &value in values {
        if value & VERSION_MASK != 0 {
            return Err(CapsicumError::InvalidRight(format!(
                "{value:#018x} carries version bits"
            )));
        }
        let idx = word_index(value)?;
        let unknown = value & PAYLOAD_MASK & !known_payload(idx);
        if unknown != 0 || value & PAYLOAD_MASK == 0 {
            return Err(CapsicumError::InvalidRight(format!("{value:#018x}")));
        }
        packed.words[idx] |= value;
    }
    Ok(packed)
}

/// Every known right whose full kernel value is present. Payload bits that
/// belong to no known right are ignored here but survive in `packed`.
pub fn decode(packed: &PackedRights) -> Result<BTreeSet<Right>> {
    packed.validate()?;
    Ok(Right::ALL
        .iter()
        .copied()
        .filter(|right| packed.has(*right))
        .collect())
}
