use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::link::{Link, LinkKind};

/**
 * Nodes
 * =====
 * Nodes are the structural building blocks of the DAG. A node is a
 *  description of links to other content, in one of two shapes:
 *  - File: an ordered sequence of unnamed chunk links whose concatenation
 *    is the file's bytes
 *  - Dir: a name-sorted sequence of named entry links
 * Nodes are always DAG-CBOR encoded with single-letter map keys. The
 *  encoding is canonical: directory links are kept sorted by name,
 *  metadata is a BTreeMap (sorted keys), and fields occupy fixed
 *  positions, so logically-equal nodes hash identically.
 */

/// Whether a node is a chunked file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Dir,
}

/// Errors that can occur encoding or decoding a node
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("node encode error: {0}")]
    Encode(String),
    #[error("bytes are not a node")]
    NotANode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    #[serde(rename = "t")]
    kind: NodeKind,
    #[serde(rename = "l")]
    links: Vec<Link>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none", default)]
    total_size: Option<u64>,
    #[serde(rename = "m", skip_serializing_if = "Option::is_none", default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl Node {
    /// Create a file node from ordered chunk links
    pub fn file(chunks: Vec<Link>, total_size: u64) -> Self {
        debug_assert!(chunks.iter().all(|l| l.name.is_none()));
        Node {
            kind: NodeKind::File,
            links: chunks,
            total_size: Some(total_size),
            metadata: None,
        }
    }

    /// Create an empty directory node
    pub fn dir() -> Self {
        Node {
            kind: NodeKind::Dir,
            links: Vec::new(),
            total_size: None,
            metadata: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }

    /// Set a metadata entry
    pub fn set_metadata(&mut self, key: String, value: String) {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key, value);
    }

    /// Look up a directory entry by name
    pub fn get_entry(&self, name: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.name.as_deref() == Some(name))
    }

    /// Insert (or replace) a directory entry, keeping links sorted by name
    ///
    /// Sorted order is part of the canonical encoding: two directories with
    /// the same entries hash identically regardless of insertion order.
    pub fn insert_entry(&mut self, link: Link) {
        debug_assert!(self.is_dir() && link.name.is_some());
        let name = link.name.clone().unwrap_or_default();
        match self
            .links
            .binary_search_by(|l| l.name.as_deref().unwrap_or_default().cmp(name.as_str()))
        {
            Ok(idx) => self.links[idx] = link,
            Err(idx) => self.links.insert(idx, link),
        }
    }

    /// Remove a directory entry by name
    pub fn remove_entry(&mut self, name: &str) -> Option<Link> {
        let idx = self
            .links
            .iter()
            .position(|l| l.name.as_deref() == Some(name))?;
        Some(self.links.remove(idx))
    }

    /// Encode the node to its canonical DAG-CBOR bytes
    ///
    /// Pure: the same logical node always encodes to identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode bytes that are required to be a node
    ///
    /// Malformed input is a distinguishable [`CodecError::NotANode`], used
    /// when the caller knows (from a link) that a node must be here.
    pub fn decode(bytes: &[u8]) -> Result<Node, CodecError> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|_| CodecError::NotANode)
    }

    /// Classify arbitrary store bytes as node or leaf blob
    ///
    /// Raw blobs share the hash key space with encoded nodes and carry no
    /// external type tag; the only way to tell them apart is a successful,
    /// type-consistent decode. This never panics on foreign input.
    pub fn classify(bytes: &[u8]) -> Option<Node> {
        serde_ipld_dagcbor::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Secret;
    use crate::dag::Cid;
    use block_store::Hash;

    fn entry(name: &str, content: &[u8]) -> Link {
        Link::entry(
            name.to_string(),
            &Cid::plain(Hash::of(content)),
            content.len() as u64,
            LinkKind::Blob,
        )
    }

    #[test]
    fn test_encode_round_trip() {
        let mut node = Node::dir();
        node.insert_entry(entry("a.txt", b"aaa"));
        node.insert_entry(entry("b.txt", b"bbb"));
        node.set_metadata("origin".to_string(), "test".to_string());

        let bytes = node.encode().unwrap();
        let decoded = Node::decode(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_canonical_insertion_order() {
        let mut a = Node::dir();
        a.insert_entry(entry("x", b"1"));
        a.insert_entry(entry("m", b"2"));
        a.insert_entry(entry("a", b"3"));

        let mut b = Node::dir();
        b.insert_entry(entry("a", b"3"));
        b.insert_entry(entry("x", b"1"));
        b.insert_entry(entry("m", b"2"));

        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn test_file_node_preserves_chunk_order() {
        let chunks = vec![
            Link::chunk(Hash::of(b"chunk0"), 6, None),
            Link::chunk(Hash::of(b"chunk1"), 6, Some(Secret::generate())),
            Link::chunk(Hash::of(b"chunk2"), 3, None),
        ];
        let node = Node::file(chunks.clone(), 15);

        let decoded = Node::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(decoded.links(), chunks.as_slice());
        assert_eq!(decoded.total_size(), Some(15));
    }

    #[test]
    fn test_classify_fails_closed() {
        // raw blob bytes must not parse as a node
        assert!(Node::classify(b"").is_none());
        assert!(Node::classify(b"just some file contents").is_none());
        assert!(Node::classify(&[0xff; 64]).is_none());
        // valid cbor of the wrong shape must not parse either
        let foreign = serde_ipld_dagcbor::to_vec(&vec![1u8, 2, 3]).unwrap();
        assert!(Node::classify(&foreign).is_none());

        let node = Node::dir();
        assert!(Node::classify(&node.encode().unwrap()).is_some());
    }

    #[test]
    fn test_decode_malformed_is_error() {
        assert!(matches!(
            Node::decode(b"garbage"),
            Err(CodecError::NotANode)
        ));
    }

    #[test]
    fn test_insert_replaces_existing_name() {
        let mut node = Node::dir();
        node.insert_entry(entry("file", b"old"));
        node.insert_entry(entry("file", b"new"));

        assert_eq!(node.links().len(), 1);
        assert_eq!(node.get_entry("file").unwrap().hash, Hash::of(b"new"));
    }

    #[test]
    fn test_remove_entry() {
        let mut node = Node::dir();
        node.insert_entry(entry("keep", b"k"));
        node.insert_entry(entry("drop", b"d"));

        assert!(node.remove_entry("drop").is_some());
        assert!(node.remove_entry("drop").is_none());
        assert!(node.get_entry("keep").is_some());
    }
}
