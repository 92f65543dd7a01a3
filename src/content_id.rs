//! Content addressing for binaries.
//!
//! A binary's identity is the SHA-256 of its bytes, never its file name. Two
//! byte-identical files under different labels or names share one id and
//! therefore one artifact name.

use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 digest of a binary's bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
