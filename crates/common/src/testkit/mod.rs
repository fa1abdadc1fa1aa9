/// Lightweight test harness for multi-peer integration tests
///
/// This module provides in-memory stand-ins for the two external systems a
/// peer talks to. [`MemoryRelay`] is a process-local relay network and
/// [`MemoryTransport`] pairs sessions directly over channels, so whole
/// peer-to-peer scenarios run in one test process with no sockets.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_block_sync() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///
///     let alice = net.add_peer("alice").await?;
///     let bob = net.add_peer("bob").await?;
///     net.wait_connected("alice", "bob").await?;
///
///     // Alice stores a block; Bob fetches it by hash
///     let hash = net.peer("alice").unwrap().put_block(b"shared").await?;
///     let data = net.peer("bob").unwrap().fetch(&hash).await?;
///     assert!(data.is_some());
///
///     net.shutdown();
///     Ok(())
/// }
/// ```
mod network;
mod peer;
mod relay;
mod transport;

pub use network::TestNetwork;
pub use peer::TestPeer;
pub use relay::MemoryRelay;
pub use transport::MemoryTransport;
