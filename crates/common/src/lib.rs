/**
 * Cryptographic types and operations.
 *  - Content encryption secrets (random and convergent)
 *  - Signing keypairs for peer identity on the relay network
 */
pub mod crypto;
/**
 * The node codec and link types for our Merkle-DAG.
 * Handles the canonical encoding of structural nodes
 *  and the classification of raw store bytes as
 *  leaf blob vs node.
 */
pub mod dag;
/**
 * Peer layer: peer identity, relay signaling, per-peer
 *  connection state machines, the block exchange protocol,
 *  and the PeerManager that fronts the local store.
 */
pub mod peer;
/**
 * In-memory relay, transport, and peer harnesses for
 *  multi-peer integration tests.
 */
pub mod testkit;
/**
 * The tree engine: builds, reads, and patches the
 *  chunked-file / directory DAG on top of the block store.
 */
pub mod tree;

pub mod prelude {
    pub use crate::crypto::{PublicKey, Secret, SecretKey};
    pub use crate::dag::{Cid, Link, LinkKind, Node};
    pub use crate::peer::{PeerId, PeerManager};
    pub use crate::tree::Tree;
    pub use block_store::{Hash, Store};
}
