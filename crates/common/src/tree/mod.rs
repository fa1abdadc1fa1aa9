//! The tree engine
//!
//! Builds, reads, and patches the chunked-file / directory Merkle-DAG on
//! top of the block store. Files are split into fixed-size chunks; a file
//! that fits in a single chunk is stored as the raw bytes under its own
//! hash (no node wrapper), larger files get a file [`Node`] whose links are
//! the ordered chunk hashes. Everything is immutable once written: any
//! "mutation" produces a new root CID, sharing every untouched subtree.
//!
//! Every operation comes in a plaintext and a convergently-encrypted
//! flavor, selected by whether the CID carries a key.

mod path_ops;

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use block_store::{Hash, Store, StoreError};

use crate::crypto::{Secret, SecretError};
use crate::dag::{Cid, CodecError, Link, Node, NodeKind};

pub use path_ops::Entry;

/// Default maximum chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Errors that can occur in tree operations
///
/// Absence (a hash missing from the store) is not an error: reads surface
/// it as `Ok(None)`. Errors are reserved for corruption, authentication
/// failures, and bad arguments.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("cid does not reference a file")]
    NotAFile,
    #[error("path is not a directory: {0}")]
    NotADirectory(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("write range out of bounds: offset {offset} + {len} exceeds file size {size}")]
    InvalidRange { offset: u64, len: u64, size: u64 },
}

/// Result of storing a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Reference to the stored file; carries the decryption key for
    /// encrypted files
    pub cid: Cid,
    /// Plaintext size in bytes
    pub size: u64,
}

/// What a CID resolved to in the store
pub(crate) enum Loaded {
    Node(Node),
    Blob(Bytes),
}

#[derive(Clone)]
pub struct Tree {
    store: Arc<dyn Store>,
    chunk_size: usize,
}

impl Tree {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_chunk_size(store, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(store: Arc<dyn Store>, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self { store, chunk_size }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    // ===== blocks =====

    /// Store a block, convergently encrypting it when `encrypt` is set.
    /// Returns the hash of the stored bytes and the key when encrypted.
    pub(crate) async fn put_block(
        &self,
        plain: &[u8],
        encrypt: bool,
    ) -> Result<(Hash, Option<Secret>), TreeError> {
        if encrypt {
            let secret = Secret::convergent(plain);
            let data = secret.encrypt_convergent(plain)?;
            let hash = Hash::of(&data);
            self.store.put(hash, Bytes::from(data)).await?;
            Ok((hash, Some(secret)))
        } else {
            let hash = Hash::of(plain);
            self.store.put(hash, Bytes::copy_from_slice(plain)).await?;
            Ok((hash, None))
        }
    }

    /// Fetch and (if keyed) decrypt the bytes behind a link, without
    /// classifying them. Chunks stay opaque.
    pub(crate) async fn load_chunk(&self, link: &Link) -> Result<Option<Bytes>, TreeError> {
        let Some(raw) = self.store.get(&link.hash).await? else {
            return Ok(None);
        };
        match &link.key {
            Some(key) => Ok(Some(Bytes::from(key.decrypt(&raw)?))),
            None => Ok(Some(raw)),
        }
    }

    /// Resolve a CID to either a structural node or a leaf blob.
    ///
    /// Wrong keys surface as a [`SecretError::Authentication`] error, never
    /// as garbage bytes or a bogus classification.
    pub(crate) async fn load_cid(&self, cid: &Cid) -> Result<Option<Loaded>, TreeError> {
        let Some(raw) = self.store.get(&cid.hash).await? else {
            return Ok(None);
        };
        let plain = match &cid.key {
            Some(key) => Bytes::from(key.decrypt(&raw)?),
            None => raw,
        };
        match Node::classify(&plain) {
            Some(node) => Ok(Some(Loaded::Node(node))),
            None => Ok(Some(Loaded::Blob(plain))),
        }
    }

    // ===== files =====

    async fn put_file_inner(&self, data: &[u8], encrypt: bool) -> Result<PutOutcome, TreeError> {
        let size = data.len() as u64;

        // single-chunk files are stored bare, no node wrapper
        if data.len() <= self.chunk_size {
            let (hash, key) = self.put_block(data, encrypt).await?;
            return Ok(PutOutcome {
                cid: Cid { hash, key },
                size,
            });
        }

        let mut links = Vec::with_capacity(data.len().div_ceil(self.chunk_size));
        for chunk in data.chunks(self.chunk_size) {
            let (hash, key) = self.put_block(chunk, encrypt).await?;
            links.push(Link::chunk(hash, chunk.len() as u64, key));
        }

        let node = Node::file(links, size);
        let encoded = node.encode()?;
        let (hash, key) = self.put_block(&encoded, encrypt).await?;

        tracing::debug!(
            "put_file: stored {} bytes as {} chunks under {}",
            size,
            node.links().len(),
            hash
        );

        Ok(PutOutcome {
            cid: Cid { hash, key },
            size,
        })
    }

    /// Split bytes into chunks and store them
    ///
    /// Deterministic: identical bytes produce an identical CID regardless of
    /// call history, and re-putting existing content is a no-op on the store.
    pub async fn put_file(&self, data: &[u8]) -> Result<PutOutcome, TreeError> {
        self.put_file_inner(data, false).await
    }

    /// Store a file with every chunk and node convergently encrypted
    ///
    /// The returned CID carries the root decryption key. Repeated calls with
    /// the same plaintext return the same `{hash, key}` pair, so encrypted
    /// content still deduplicates across unrelated writers.
    pub async fn put_file_encrypted(&self, data: &[u8]) -> Result<PutOutcome, TreeError> {
        self.put_file_inner(data, true).await
    }

    /// Read a whole file back
    ///
    /// Returns `None` when the root hash or any chunk is absent from the
    /// store. Decrypting with a wrong key fails with an authentication
    /// error rather than returning garbage.
    pub async fn read_file(&self, cid: &Cid) -> Result<Option<Vec<u8>>, TreeError> {
        match self.load_cid(cid).await? {
            None => Ok(None),
            Some(Loaded::Blob(bytes)) => Ok(Some(bytes.to_vec())),
            Some(Loaded::Node(node)) => {
                if node.kind() != NodeKind::File {
                    return Err(TreeError::NotAFile);
                }
                let mut out = Vec::with_capacity(node.total_size().unwrap_or(0) as usize);
                for link in node.links() {
                    match self.load_chunk(link).await? {
                        Some(chunk) => out.extend_from_slice(&chunk),
                        None => {
                            tracing::debug!("read_file: missing chunk {}", link.hash);
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(out))
            }
        }
    }

    /// Read a file as a lazy stream of decrypted chunks
    ///
    /// The stream is finite, non-restartable, and yields one item per
    /// underlying chunk in file order; chunks are only fetched as the
    /// stream is polled, so whole files never need to sit in memory.
    /// A chunk that has gone missing mid-stream surfaces as an error item.
    pub async fn read_file_stream(
        &self,
        cid: &Cid,
    ) -> Result<Option<BoxStream<'static, Result<Bytes, TreeError>>>, TreeError> {
        let node = match self.load_cid(cid).await? {
            None => return Ok(None),
            Some(Loaded::Blob(bytes)) => {
                return Ok(Some(stream::once(async move { Ok(bytes) }).boxed()));
            }
            Some(Loaded::Node(node)) => node,
        };
        if node.kind() != NodeKind::File {
            return Err(TreeError::NotAFile);
        }

        let links: Vec<Link> = node.links().to_vec();
        let tree = self.clone();
        let chunks = stream::iter(links).then(move |link| {
            let tree = tree.clone();
            async move {
                match tree.load_chunk(&link).await? {
                    Some(chunk) => Ok(chunk),
                    None => Err(TreeError::Default(anyhow::anyhow!(
                        "chunk {} missing from store",
                        link.hash
                    ))),
                }
            }
        });
        Ok(Some(chunks.boxed()))
    }

    /// Read a byte range `[start, end)` of a file
    ///
    /// Resolves only the chunks overlapping the range; unrelated chunks are
    /// never fetched. `end` is clamped to the file size.
    pub async fn read_file_range(
        &self,
        cid: &Cid,
        start: u64,
        end: u64,
    ) -> Result<Option<Vec<u8>>, TreeError> {
        match self.load_cid(cid).await? {
            None => Ok(None),
            Some(Loaded::Blob(bytes)) => {
                let start = (start as usize).min(bytes.len());
                let end = (end as usize).min(bytes.len()).max(start);
                Ok(Some(bytes[start..end].to_vec()))
            }
            Some(Loaded::Node(node)) => {
                if node.kind() != NodeKind::File {
                    return Err(TreeError::NotAFile);
                }
                let size = node.total_size().unwrap_or(0);
                let end = end.min(size);
                if start >= end {
                    return Ok(Some(Vec::new()));
                }

                let mut out = Vec::with_capacity((end - start) as usize);
                let mut offset = 0u64;
                for link in node.links() {
                    let len = link.size.unwrap_or(0);
                    let chunk_end = offset + len;
                    if chunk_end > start && offset < end {
                        let Some(chunk) = self.load_chunk(link).await? else {
                            return Ok(None);
                        };
                        let from = start.saturating_sub(offset) as usize;
                        let to = (end.min(chunk_end) - offset) as usize;
                        out.extend_from_slice(&chunk[from..to]);
                    }
                    offset = chunk_end;
                    if offset >= end {
                        break;
                    }
                }
                Ok(Some(out))
            }
        }
    }

    /// Structurally patch a file at a byte offset
    ///
    /// Rewrites only the chunks overlapping `[offset, offset + len)` and
    /// produces a new file node whose unaffected chunk links are
    /// byte-identical to the original, so untouched chunks keep their
    /// hashes and stay shared between old and new root. Writing past the
    /// end of the file is an [`TreeError::InvalidRange`] error.
    pub async fn write_at(&self, cid: &Cid, offset: u64, data: &[u8]) -> Result<Cid, TreeError> {
        let encrypt = cid.key.is_some();
        let len = data.len() as u64;

        match self.load_cid(cid).await? {
            None => Err(TreeError::Default(anyhow::anyhow!(
                "cannot patch missing file {}",
                cid.hash
            ))),
            Some(Loaded::Blob(bytes)) => {
                let size = bytes.len() as u64;
                let end = match offset.checked_add(len) {
                    Some(end) if end <= size => end,
                    _ => return Err(TreeError::InvalidRange { offset, len, size }),
                };
                let mut patched = bytes.to_vec();
                patched[offset as usize..end as usize].copy_from_slice(data);
                let (hash, key) = self.put_block(&patched, encrypt).await?;
                Ok(Cid { hash, key })
            }
            Some(Loaded::Node(node)) => {
                if node.kind() != NodeKind::File {
                    return Err(TreeError::NotAFile);
                }
                let size = node.total_size().unwrap_or(0);
                let end = match offset.checked_add(len) {
                    Some(end) if end <= size => end,
                    _ => return Err(TreeError::InvalidRange { offset, len, size }),
                };
                if len == 0 {
                    return Ok(cid.clone());
                }

                let mut links = Vec::with_capacity(node.links().len());
                let mut chunk_start = 0u64;
                for link in node.links() {
                    let chunk_len = link.size.unwrap_or(0);
                    let chunk_end = chunk_start + chunk_len;
                    if chunk_end > offset && chunk_start < end {
                        // overlapping chunk: rewrite content and hash
                        let Some(chunk) = self.load_chunk(link).await? else {
                            return Err(TreeError::Default(anyhow::anyhow!(
                                "chunk {} missing from store",
                                link.hash
                            )));
                        };
                        let mut patched = chunk.to_vec();
                        let from = offset.saturating_sub(chunk_start) as usize;
                        let to = (end.min(chunk_end) - chunk_start) as usize;
                        let src_from = (chunk_start.max(offset) - offset) as usize;
                        patched[from..to]
                            .copy_from_slice(&data[src_from..src_from + (to - from)]);
                        let (hash, key) = self.put_block(&patched, encrypt).await?;
                        links.push(Link::chunk(hash, chunk_len, key));
                    } else {
                        // untouched chunk: share the link byte-identically
                        links.push(link.clone());
                    }
                    chunk_start = chunk_end;
                }

                let patched_node = Node::file(links, size);
                let encoded = patched_node.encode()?;
                let (hash, key) = self.put_block(&encoded, encrypt).await?;
                Ok(Cid { hash, key })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use block_store::MemoryStore;

    fn small_tree() -> Tree {
        Tree::with_chunk_size(Arc::new(MemoryStore::new()), 10)
    }

    #[tokio::test]
    async fn test_single_chunk_is_raw() {
        let tree = small_tree();
        let data = b"tiny";

        let outcome = tree.put_file(data).await.unwrap();
        // the CID of a single-chunk file is the hash of the raw bytes
        assert_eq!(outcome.cid.hash, Hash::of(data));
        assert!(outcome.cid.key.is_none());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let tree = small_tree();
        let absent = Cid::plain(Hash::of(b"never stored"));
        assert!(tree.read_file(&absent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_key_is_authentication_error() {
        let tree = small_tree();
        let outcome = tree.put_file_encrypted(b"secret bytes").await.unwrap();

        let wrong = Cid::encrypted(outcome.cid.hash, Secret::generate());
        let result = tree.read_file(&wrong).await;
        assert!(matches!(
            result,
            Err(TreeError::Secret(SecretError::Authentication))
        ));
    }

    #[tokio::test]
    async fn test_write_at_past_eof_rejected() {
        let tree = small_tree();
        let outcome = tree.put_file(b"0123456789abcdef").await.unwrap();

        let result = tree.write_at(&outcome.cid, 15, b"xx").await;
        assert!(matches!(result, Err(TreeError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_write_at_offset_overflow_rejected() {
        let tree = small_tree();

        // chunked file
        let outcome = tree.put_file(b"0123456789abcdef").await.unwrap();
        let result = tree.write_at(&outcome.cid, u64::MAX - 1, b"xx").await;
        assert!(matches!(result, Err(TreeError::InvalidRange { .. })));

        // single-chunk file stored bare
        let small = tree.put_file(b"tiny").await.unwrap();
        let result = tree.write_at(&small.cid, u64::MAX, b"x").await;
        assert!(matches!(result, Err(TreeError::InvalidRange { .. })));
    }
}
