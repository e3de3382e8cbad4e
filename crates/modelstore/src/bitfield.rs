//! Virtual boolean properties backed by bits of one integer column
//!
//! ```text
//! flags (INTEGER) = 0b0000_0011
//!                          │└─ autoDownload (mask 1)
//!                          └── wifiOnly     (mask 2)
//! ```

use serde::{Deserialize, Serialize};

/// Whether any bit of `bit_mask` is set in `flags`.
pub fn is_bit_set(bit_mask: i64, flags: i64) -> bool {
    flags & bit_mask != 0
}

/// Set or clear the bits of `bit_mask` in `flags`, leaving every other bit
/// untouched.
pub fn set_bit(bit_mask: i64, flags: i64, on: bool) -> i64 {
    if on {
        flags | bit_mask
    } else {
        flags & !bit_mask
    }
}

/// One integer backing key and the virtual keys stored in its bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldMapping {
    backing_key: String,
    flags: Vec<(String, i64)>,
}

impl BitFieldMapping {
    pub fn new(backing_key: impl Into<String>) -> Self {
        Self {
            backing_key: backing_key.into(),
            flags: Vec::new(),
        }
    }

    /// Add a virtual key stored under `bit_mask`.
    pub fn flag(mut self, key: impl Into<String>, bit_mask: i64) -> Self {
        self.flags.push((key.into(), bit_mask));
        self
    }

    pub fn backing_key(&self) -> &str {
        &self.backing_key
    }

    /// Virtual keys and their masks, in declaration order.
    pub fn flags(&self) -> impl Iterator<Item = (&str, i64)> {
        self.flags.iter().map(|(k, m)| (k.as_str(), *m))
    }

    pub fn mask_for(&self, key: &str) -> Option<i64> {
        self.flags.iter().find(|(k, _)| k == key).map(|(_, m)| *m)
    }
}
