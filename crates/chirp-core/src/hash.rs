//! MD5 hash identity for groups and peer names.
//!
//! CHIRP identifies a group and a peer by the MD5 digest of its name, a
//! compact fixed-width tag that fits a broadcast datagram. The digest is
//! an identifier, not a security boundary: collision resistance is not
//! relied on, only effective uniqueness among operator-chosen names.

use std::fmt;

use md5::{Digest, Md5};

/// A 16-byte MD5 digest.
///
/// Equality is byte-wise; ordering is byte-wise lexicographic. Two peers
/// (or two groups) are the same exactly when their digests are equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    /// Hash the UTF-8 bytes of a name.
    pub fn of(name: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Wrap raw digest bytes, e.g. taken from the wire.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Display for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Hash({})", hex::encode(self.0))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
