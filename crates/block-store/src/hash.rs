use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of a BLAKE3 digest in bytes
pub const HASH_SIZE: usize = 32;

/// Errors that can occur when parsing a hash
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("hash error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A 32-byte BLAKE3 digest of a byte sequence
///
/// Every blob, node, and ciphertext in skiff is addressed by the hash of
/// its stored bytes. Hashes render as 64 lowercase hex characters and
/// round-trip exactly through [`Hash::from_hex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Compute the hash of a byte sequence
    pub fn of(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parse a hash from a 64-character hex string
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 64 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut buff = [0; HASH_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("hash hex decode error"))?;
        Ok(Hash(buff))
    }

    /// Render the hash as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }
}

impl FromStr for Hash {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hash_determinism() {
        let a = Hash::of(b"hello world");
        let b = Hash::of(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, Hash::of(b"hello worlds"));
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = Hash::of(b"round trip");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"z".repeat(64)).is_err());
        assert!(Hash::from_hex(&"a".repeat(66)).is_err());
    }
}
