//! Block exchange wire protocol
//!
//! Once a connection is up, two message classes share its channel:
//! human-debuggable JSON control messages ([`Control`]) and binary payload
//! frames (`4-byte little-endian request id || raw chunk bytes`). Many
//! concurrent requests multiplex over one channel and are demultiplexed by
//! id on receipt.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use block_store::Hash;

/// Errors that can occur in the exchange protocol
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("exchange error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("channel closed")]
    ChannelClosed,
}

/// A message on the data channel
///
/// Text carries JSON control messages; binary carries id-framed chunk
/// payloads. The distinction is part of the channel contract, mirroring
/// the string/binary split of the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// Control messages of the exchange protocol
///
/// `req` asks whether the remote holds `hash`; `res` answers, and when
/// `found` the chunk bytes follow as a binary frame tagged with the same
/// id. Unknown `type` tags fail decoding and are treated as a protocol
/// violation by the receive loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Control {
    Req { id: u32, hash: String },
    Res { id: u32, hash: String, found: bool },
}

impl Control {
    pub fn req(id: u32, hash: &Hash) -> Self {
        Control::Req {
            id,
            hash: hash.to_hex(),
        }
    }

    pub fn res(id: u32, hash: &Hash, found: bool) -> Self {
        Control::Res {
            id,
            hash: hash.to_hex(),
            found,
        }
    }

    pub fn encode(&self) -> Result<String, ExchangeError> {
        serde_json::to_string(self).map_err(|e| anyhow::anyhow!("control encode: {}", e).into())
    }

    pub fn decode(text: &str) -> Result<Self, ExchangeError> {
        serde_json::from_str(text)
            .map_err(|e| ExchangeError::Protocol(format!("bad control message: {}", e)))
    }
}

/// Encode a binary payload frame: 4-byte little-endian id, then the bytes
pub fn encode_data_frame(id: u32, data: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.put_u32_le(id);
    frame.put_slice(data);
    frame.freeze()
}

/// Decode a binary payload frame into its request id and chunk bytes
pub fn decode_data_frame(frame: &Bytes) -> Result<(u32, Bytes), ExchangeError> {
    if frame.len() < 4 {
        return Err(ExchangeError::Protocol(format!(
            "binary frame too short: {} bytes",
            frame.len()
        )));
    }
    let id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    Ok((id, frame.slice(4..)))
}
