//! Cryptographic primitives for skiff
//!
//! Two concerns live here:
//!
//! - **Content encryption**: every encrypted blob or node is sealed with its
//!   own ChaCha20-Poly1305 [`Secret`]. Keys come in two modes: random, or
//!   derived deterministically from the plaintext itself (convergent
//!   encryption), so identical plaintext always yields identical ciphertext
//!   and the store can deduplicate encrypted content it cannot read.
//! - **Peer identity**: Ed25519 keypairs ([`SecretKey`]/[`PublicKey`]) used
//!   to sign presence and negotiation events on the relay network.
//!
//! Decryption keys travel out-of-band from the store, inside links and CIDs.
//! The store only ever sees ciphertext and its hash.

mod keys;
mod secret;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
pub use secret::{
    encrypted_size, plaintext_size, Secret, SecretError, ENCRYPTION_OVERHEAD, NONCE_SIZE,
    SECRET_SIZE, TAG_SIZE,
};
