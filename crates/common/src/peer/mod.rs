//! Peer layer
//!
//! Two processes that never exchanged network addresses discover each other
//! through a public relay network, negotiate a direct data channel, and
//! fetch missing blocks by hash from whichever peer holds them.
//!
//! - [`PeerId`]: stable addressable identity (`pubkey:session`)
//! - [`signal`]: presence + negotiation events on the relay
//! - [`connection`]: per-peer negotiation state machine over an abstract
//!   transport
//! - [`exchange`]: the block exchange wire protocol (JSON control messages
//!   and id-framed binary payloads over one channel)
//! - [`manager`]: the [`PeerManager`] orchestrating all of the above in
//!   front of the local store

pub mod connection;
pub mod exchange;
pub mod manager;
mod peer_id;
pub mod signal;

pub use connection::{ChannelPair, Connection, ConnectionState, Session, Transport, TransportError};
pub use exchange::{Control, ExchangeError, Frame};
pub use manager::{PeerError, PeerManager, PeerManagerConfig};
pub use peer_id::{PeerId, PeerIdError};
pub use signal::{Relay, RelayEvent, SignalError, SignalPayload};
