//! Linked-data types for the skiff Merkle-DAG.
//!
//! Everything in the store is addressed by the hash of its stored bytes.
//! Structural [`Node`]s (chunked files and directories) are DAG-CBOR
//! encoded with a canonical short-key layout, so two logically-equal nodes
//! always produce byte-identical encodings and therefore the same hash.
//! Leaf blobs below the chunk threshold are stored bare, never wrapped,
//! which means store bytes carry no type tag: [`Node::classify`] is the
//! fail-closed decoder that tells the two apart.

mod link;
mod node;

pub use link::{Cid, CidError, Link, LinkKind};
pub use node::{CodecError, Node, NodeKind};
