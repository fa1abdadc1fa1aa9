use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey};

/// Errors that can occur parsing a peer id
#[derive(Debug, thiserror::Error)]
pub enum PeerIdError {
    #[error("peer id error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Stable addressable peer identity
///
/// A peer id is the peer's public key plus a per-process session
/// identifier, rendered as `<64-hex-pubkey>:<session>`. The same keypair
/// restarted in a new process announces under a new session, so stale
/// relay events never route to the wrong incarnation. The session part may
/// contain arbitrary characters, including further `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    pubkey: PublicKey,
    session: String,
}

impl PeerId {
    pub fn new(pubkey: PublicKey, session: String) -> Self {
        PeerId { pubkey, session }
    }

    /// A fresh identity for this process: the given keypair plus a random
    /// session id
    pub fn generate(secret: &SecretKey) -> Self {
        PeerId {
            pubkey: secret.public(),
            session: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Abbreviated display form: first 8 hex chars of the pubkey plus the
    /// first 6 chars of the session
    pub fn short(&self) -> String {
        let hex = self.pubkey.to_hex();
        let session: String = self.session.chars().take(6).collect();
        format!("{}:{}", &hex[..8], session)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pubkey.to_hex(), self.session)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    /// Parse by splitting on the first `:`; everything after the 64-hex
    /// pubkey is the session id verbatim
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pubkey, session) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("peer id missing ':' separator"))?;
        let pubkey =
            PublicKey::from_hex(pubkey).map_err(|e| anyhow::anyhow!("peer id pubkey: {}", e))?;
        Ok(PeerId {
            pubkey,
            session: session.to_string(),
        })
    }
}

impl Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
