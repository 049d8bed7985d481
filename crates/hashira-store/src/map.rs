//! named map handles, flags and key encoding

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Handle to a named map within an environment. Valid for the lifetime of
/// the environment that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MapId(pub(crate) u32);

impl MapId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Behavior flags fixed when a map is first created.
///
/// `create` is an open-time request, not a stored property: reopening an
/// existing map checks the other three flags for compatibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFlags {
    /// Keys are 8-byte encodings of `u64`, ordered numerically.
    pub integer_key: bool,
    /// A key may hold several values, kept in comparator order.
    pub dup_sort: bool,
    /// All values under one key must have equal length.
    pub dup_fixed: bool,
    /// Create the map if it does not exist yet.
    pub create: bool,
}

impl MapFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integer_key(mut self) -> Self {
        self.integer_key = true;
        self
    }

    pub fn dup_sort(mut self) -> Self {
        self.dup_sort = true;
        self
    }

    pub fn dup_fixed(mut self) -> Self {
        self.dup_fixed = true;
        self
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub(crate) fn compatible(self, other: MapFlags) -> bool {
        self.integer_key == other.integer_key
            && self.dup_sort == other.dup_sort
            && self.dup_fixed == other.dup_fixed
    }

    /// The form persisted in the data file: `create` is not a property.
    pub(crate) fn stored(mut self) -> Self {
        self.create = false;
        self
    }
}

/// Ordering of duplicate values under one key.
///
/// The same comparator must be supplied on every open of a given map: the
/// on-disk dup order is whatever the writing session used, and lookups
/// binary-search with the session comparator.
pub type DupCmp = fn(&[u8], &[u8]) -> Ordering;

/// Default duplicate order: lexicographic bytes.
pub(crate) fn bytes_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Write modes for `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutMode {
    /// Replace any existing value (or equal-comparing duplicate).
    Overwrite,
    /// Fail with `KeyExists` if the key (or an equal duplicate) is present.
    NoOverwrite,
    /// Monotone-key fast path: the key must sort after every existing key.
    Append,
}

/// Encodes a `u64` key so that byte order equals numeric order.
pub fn int_key(k: u64) -> [u8; 8] {
    k.to_be_bytes()
}

/// Decodes a key produced by [`int_key`].
pub fn decode_int_key(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}
