//! Hash-keyed block storage for skiff.
//!
//! This crate provides the two things every layer above it is built on:
//! - **[`Hash`]**: a 32-byte BLAKE3 digest. All addressing in skiff is
//!   content addressing, and `Hash` is the sole key space of the store.
//! - **[`Store`]**: an async get/put/has contract over opaque bytes, with
//!   a pluggable backend. Two backends ship here:
//!   - [`MemoryStore`]: an in-memory map, used by tests and ephemeral peers
//!   - [`FsStore`]: one file per blob under a root directory, named by
//!     hex digest
//!
//! Callers are responsible for passing the correct hash on `put`; a backend
//! may verify it but is not required to.

mod hash;
mod store;

pub use hash::{Hash, HashError, HASH_SIZE};
pub use store::{FsStore, MemoryStore, Store, StoreError};
