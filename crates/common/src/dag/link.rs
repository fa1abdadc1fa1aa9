use std::fmt;
use std::str::FromStr;

use block_store::Hash;
use serde::{Deserialize, Serialize};

use crate::crypto::Secret;

/// What a link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// A raw leaf blob (or a chunk of a file)
    #[serde(rename = "b")]
    Blob,
    /// A chunked file node
    #[serde(rename = "f")]
    File,
    /// A directory node
    #[serde(rename = "d")]
    Dir,
}

/// A reference from a node to other content in the store
///
/// `name` present means the link is a directory entry; absent means it is an
/// ordered chunk reference inside a chunked file. `key` present means the
/// referenced bytes are encrypted and this is their decryption key
/// (convergent or random).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Link {
    #[serde(rename = "h")]
    pub hash: Hash,
    #[serde(rename = "t")]
    pub kind: LinkKind,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    #[serde(rename = "k", skip_serializing_if = "Option::is_none", default)]
    pub key: Option<Secret>,
}

impl Link {
    /// An ordered chunk reference inside a chunked file
    pub fn chunk(hash: Hash, size: u64, key: Option<Secret>) -> Self {
        Link {
            hash,
            kind: LinkKind::Blob,
            name: None,
            size: Some(size),
            key,
        }
    }

    /// A named directory entry
    pub fn entry(name: String, cid: &Cid, size: u64, kind: LinkKind) -> Self {
        Link {
            hash: cid.hash,
            kind,
            name: Some(name),
            size: Some(size),
            key: cid.key.clone(),
        }
    }

    /// The CID a caller would use to read this link's target
    pub fn cid(&self) -> Cid {
        Cid {
            hash: self.hash,
            key: self.key.clone(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, LinkKind::Dir)
    }
}

/// Errors that can occur parsing a CID string
#[derive(Debug, thiserror::Error)]
pub enum CidError {
    #[error("cid error: {0}")]
    Default(#[from] anyhow::Error),
}

/// The external reference a caller uses to read content
///
/// Carries the decryption key out-of-band from the store: the store only
/// ever sees ciphertext and its hash. Renders as `<hash-hex>` for plaintext
/// content or `<hash-hex>.<key-hex>` for encrypted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cid {
    pub hash: Hash,
    pub key: Option<Secret>,
}

impl Cid {
    pub fn plain(hash: Hash) -> Self {
        Cid { hash, key: None }
    }

    pub fn encrypted(hash: Hash, key: Secret) -> Self {
        Cid {
            hash,
            key: Some(key),
        }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{}", self.hash.to_hex(), key.to_hex()),
            None => write!(f, "{}", self.hash.to_hex()),
        }
    }
}

impl FromStr for Cid {
    type Err = CidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((hash, key)) => Ok(Cid {
                hash: Hash::from_hex(hash).map_err(|e| anyhow::anyhow!("bad cid hash: {}", e))?,
                key: Some(
                    Secret::from_hex(key).map_err(|e| anyhow::anyhow!("bad cid key: {}", e))?,
                ),
            }),
            None => Ok(Cid {
                hash: Hash::from_hex(s).map_err(|e| anyhow::anyhow!("bad cid hash: {}", e))?,
                key: None,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cid_string_round_trip() {
        let plain = Cid::plain(Hash::of(b"content"));
        let parsed: Cid = plain.to_string().parse().unwrap();
        assert_eq!(parsed, plain);

        let encrypted = Cid::encrypted(Hash::of(b"ciphertext"), Secret::generate());
        let parsed: Cid = encrypted.to_string().parse().unwrap();
        assert_eq!(parsed, encrypted);
    }

    #[test]
    fn test_cid_bad_string_rejected() {
        assert!("not-hex".parse::<Cid>().is_err());
        assert!(format!("{}.{}", Hash::of(b"x").to_hex(), "ffff")
            .parse::<Cid>()
            .is_err());
    }
}
