//! Relay signaling
//!
//! The relay network is a rendezvous channel: peers announce presence and
//! exchange connection-negotiation payloads as signed events tagged with a
//! shared topic and a short expiration, so relays may garbage-collect them.
//! No data blocks ever travel over the relay.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::crypto::{KeyError, PublicKey, SecretKey};

use super::peer_id::PeerId;

/// Application-specific event kind for signaling events
pub const SIGNAL_KIND: u16 = 29333;
/// Default rendezvous topic
pub const DEFAULT_TOPIC: &str = "webrtc";

/// Errors that can occur in signaling
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("relay subscription closed")]
    Closed,
}

/// Connection-negotiation message bodies
///
/// One variant per message `type`; decoding is exhaustive and unknown tags
/// fail deserialization, which callers treat as a protocol violation (the
/// offending event is dropped, the session continues). `peer_id` is always
/// the sender; directed messages additionally carry the recipient in `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    /// Presence announcement to the topic at large
    Hello { peer_id: PeerId },
    /// Connection offer directed at one peer
    Offer {
        peer_id: PeerId,
        to: PeerId,
        sdp: String,
    },
    /// Answer to a previously received offer
    Answer {
        peer_id: PeerId,
        to: PeerId,
        sdp: String,
    },
    /// Transport candidate for an in-progress negotiation
    Candidate {
        peer_id: PeerId,
        to: PeerId,
        candidate: String,
    },
}

impl SignalPayload {
    /// The sending peer
    pub fn sender(&self) -> &PeerId {
        match self {
            SignalPayload::Hello { peer_id } => peer_id,
            SignalPayload::Offer { peer_id, .. } => peer_id,
            SignalPayload::Answer { peer_id, .. } => peer_id,
            SignalPayload::Candidate { peer_id, .. } => peer_id,
        }
    }

    /// The recipient, when the message is directed
    pub fn recipient(&self) -> Option<&PeerId> {
        match self {
            SignalPayload::Hello { .. } => None,
            SignalPayload::Offer { to, .. } => Some(to),
            SignalPayload::Answer { to, .. } => Some(to),
            SignalPayload::Candidate { to, .. } => Some(to),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A signed event on the relay network
///
/// `id` is the BLAKE3 hash of the canonical serialization and `sig` is the
/// author's Ed25519 signature over it. Tags carry the topic (`t`), a
/// per-message unique id (`d`), and a Unix-time `expiration` after which
/// relays may drop the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl RelayEvent {
    /// Build and sign a signaling event
    pub fn new(
        secret: &SecretKey,
        topic: &str,
        payload: &SignalPayload,
        ttl: Duration,
    ) -> Result<Self, SignalError> {
        let content = serde_json::to_string(payload)
            .map_err(|e| anyhow::anyhow!("payload encode: {}", e))?;
        let created_at = unix_now();
        let tags = vec![
            vec!["t".to_string(), topic.to_string()],
            vec!["d".to_string(), uuid::Uuid::new_v4().to_string()],
            vec![
                "expiration".to_string(),
                (created_at + ttl.as_secs()).to_string(),
            ],
        ];
        let pubkey = secret.public().to_hex();
        let id = Self::compute_id(&pubkey, created_at, SIGNAL_KIND, &tags, &content)?;
        let sig = hex::encode(secret.sign(id.as_bytes()).to_bytes());
        Ok(RelayEvent {
            id,
            pubkey,
            created_at,
            kind: SIGNAL_KIND,
            tags,
            content,
            sig,
        })
    }

    fn compute_id(
        pubkey: &str,
        created_at: u64,
        kind: u16,
        tags: &[Vec<String>],
        content: &str,
    ) -> Result<String, SignalError> {
        // canonical preimage: a fixed-position JSON array
        let preimage = serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))
            .map_err(|e| anyhow::anyhow!("id preimage encode: {}", e))?;
        Ok(hex::encode(blake3::hash(&preimage).as_bytes()))
    }

    /// Verify the event id and signature
    pub fn verify(&self) -> Result<(), SignalError> {
        let expected =
            Self::compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if expected != self.id {
            return Err(SignalError::Protocol("event id mismatch".to_string()));
        }
        let author = self.author()?;
        let sig_bytes: [u8; 64] = hex::decode(&self.sig)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SignalError::Protocol("malformed signature".to_string()))?;
        author
            .verify(self.id.as_bytes(), &Signature::from_bytes(&sig_bytes))
            .map_err(|_| SignalError::Protocol("bad event signature".to_string()))?;
        Ok(())
    }

    pub fn author(&self) -> Result<PublicKey, SignalError> {
        PublicKey::from_hex(&self.pubkey)
            .map_err(|_| SignalError::Protocol("malformed event pubkey".to_string()))
    }

    fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    pub fn topic(&self) -> Option<&str> {
        self.tag("t")
    }

    pub fn expiration(&self) -> Option<u64> {
        self.tag("expiration").and_then(|e| e.parse().ok())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expiration(), Some(exp) if exp < now)
    }

    /// Decode the signaling payload carried in `content`
    ///
    /// Unknown `type` tags are a protocol violation, not silently ignored.
    pub fn payload(&self) -> Result<SignalPayload, SignalError> {
        serde_json::from_str(&self.content)
            .map_err(|e| SignalError::Protocol(format!("bad signal payload: {}", e)))
    }
}

/// The rendezvous channel to the relay network
///
/// Implementations publish signed events and deliver topic-filtered
/// subscriptions. Tearing down the subscription (dropping the receiver or
/// the relay closing it) cancels any negotiation waiting on it.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    async fn publish(&self, event: RelayEvent) -> Result<(), SignalError>;
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<RelayEvent>, SignalError>;
}
