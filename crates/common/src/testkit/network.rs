use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::peer::TestPeer;
use super::relay::MemoryRelay;
use super::transport::MemoryTransport;

/// A coordinator for multiple test peers
///
/// All peers added to one network share the same in-memory relay and
/// transport, so they discover and connect to each other exactly as
/// production peers would over real infrastructure.
pub struct TestNetwork {
    relay: MemoryRelay,
    transport: MemoryTransport,
    /// All peers in the network, indexed by name
    peers: HashMap<String, TestPeer>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            relay: MemoryRelay::new(),
            transport: MemoryTransport::new(),
            peers: HashMap::new(),
        }
    }

    /// Add a new peer to the network and start it
    pub async fn add_peer(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.peers.contains_key(&name) {
            return Err(anyhow!("peer '{}' already exists", name));
        }
        let peer = TestPeer::new(name.clone(), self.relay.clone(), self.transport.clone());
        peer.start().await?;
        self.peers.insert(name, peer);
        Ok(())
    }

    /// Get a peer by name
    pub fn peer(&self, name: &str) -> Option<&TestPeer> {
        self.peers.get(name)
    }

    /// The shared relay (for publishing hand-crafted events in tests)
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    /// Wait until two named peers hold open channels to each other
    ///
    /// Discovery is asynchronous; polling beats sleeping a fixed amount.
    pub async fn wait_connected(&self, a: &str, b: &str) -> Result<()> {
        let a = self.peer(a).ok_or_else(|| anyhow!("no peer '{}'", a))?;
        let b = self.peer(b).ok_or_else(|| anyhow!("no peer '{}'", b))?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if a.connected().contains(b.id()) && b.connected().contains(a.id()) {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                return Err(anyhow!(
                    "peers '{}' and '{}' never connected",
                    a.name,
                    b.name
                ));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn shutdown(&self) {
        for peer in self.peers.values() {
            peer.shutdown();
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}
