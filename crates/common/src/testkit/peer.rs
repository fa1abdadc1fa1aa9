use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use block_store::{Hash, MemoryStore, Store};

use crate::crypto::SecretKey;
use crate::peer::{PeerId, PeerManager, PeerManagerConfig};
use crate::tree::Tree;

use super::relay::MemoryRelay;
use super::transport::MemoryTransport;

/// A test peer with convenience methods for integration testing
pub struct TestPeer {
    /// The name of this peer (for debugging)
    pub name: String,
    store: Arc<MemoryStore>,
    manager: PeerManager,
}

impl TestPeer {
    /// Create a peer wired to the shared in-memory relay and transport
    ///
    /// Timeouts are cut down from the defaults so a test where nothing
    /// answers still finishes quickly.
    pub fn new(name: impl Into<String>, relay: MemoryRelay, transport: MemoryTransport) -> Self {
        let name = name.into();
        let store = Arc::new(MemoryStore::new());
        let config = PeerManagerConfig {
            request_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let manager = PeerManager::new(
            SecretKey::generate(),
            store.clone(),
            Arc::new(relay),
            Arc::new(transport),
            config,
        );
        Self {
            name,
            store,
            manager,
        }
    }

    /// Start discovery and announce presence
    pub async fn start(&self) -> Result<()> {
        tracing::debug!("[{}] starting peer {}", self.name, self.id().short());
        self.manager.start().await?;
        Ok(())
    }

    pub fn id(&self) -> &PeerId {
        self.manager.local_id()
    }

    pub fn manager(&self) -> &PeerManager {
        &self.manager
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// A tree engine over this peer's store
    pub fn tree(&self) -> Tree {
        Tree::new(self.store.clone())
    }

    /// Store raw bytes locally, returning their hash
    pub async fn put_block(&self, data: &[u8]) -> Result<Hash> {
        let hash = Hash::of(data);
        self.store
            .put(hash, Bytes::copy_from_slice(data))
            .await?;
        Ok(hash)
    }

    /// Get a block, consulting connected peers on a local miss
    pub async fn fetch(&self, hash: &Hash) -> Result<Option<Bytes>> {
        Ok(self.manager.fetch(hash).await?)
    }

    /// Peers this peer holds an open channel to
    pub fn connected(&self) -> Vec<PeerId> {
        self.manager.connected_peers()
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
