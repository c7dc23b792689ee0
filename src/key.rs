//! Content keys
//!
//! A content key is the CRC-32 (IEEE) checksum of a blob's raw bytes. It is a
//! dense, non-cryptographic fingerprint: two different payloads can share a
//! key. See `DataStore::store` for how collisions are detected.
//!
//! The checksum and the decimal file name are part of the on-disk contract;
//! changing either invalidates existing stores.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Checksum-derived identifier of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(u32);

impl ContentKey {
    /// Compute the key for a payload
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        ContentKey(hasher.finalize())
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// File name of the blob for this key: `<decimal>.<ext>`
    pub fn file_name(self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }

    /// Parse a blob file name back into a key
    ///
    /// "3632233996.dat" → Some(3632233996) for extension "dat"
    pub fn from_file_name(name: &str, extension: &str) -> Option<Self> {
        let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
        // Reject "+12" and "012": only the canonical rendering names a blob
        if stem.starts_with('+') || (stem.len() > 1 && stem.starts_with('0')) {
            return None;
        }
        stem.parse().ok().map(ContentKey)
    }
}

impl From<u32> for ContentKey {
    fn from(value: u32) -> Self {
        ContentKey(value)
    }
}

impl From<ContentKey> for u32 {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentKey {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(ContentKey)
    }
}
