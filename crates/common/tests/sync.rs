//! Integration tests for peer discovery and block exchange

use std::time::Duration;

use bytes::Bytes;
use common::dag::Node;
use common::testkit::TestNetwork;
use block_store::{Hash, Store};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_fetch_from_peer() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();

    let hash = net
        .peer("alice")
        .unwrap()
        .put_block(b"shared block")
        .await
        .unwrap();

    let bob = net.peer("bob").unwrap();
    let data = bob.fetch(&hash).await.unwrap().unwrap();
    assert_eq!(data.as_ref(), b"shared block");

    // the fetched block was written back to bob's local store
    assert!(bob.store().has(&hash).await.unwrap());

    net.shutdown();
}

#[tokio::test]
async fn test_fetch_prefers_local_store() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("solo").await.unwrap();

    let solo = net.peer("solo").unwrap();
    let hash = solo.put_block(b"already here").await.unwrap();

    // no peers connected, yet the local block resolves
    assert!(solo.connected().is_empty());
    let data = solo.fetch(&hash).await.unwrap().unwrap();
    assert_eq!(data.as_ref(), b"already here");

    net.shutdown();
}

#[tokio::test]
async fn test_fetch_missing_everywhere_is_none() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();

    let absent = Hash::of(b"nobody has this");
    let result = net.peer("bob").unwrap().fetch(&absent).await.unwrap();
    assert!(result.is_none());

    net.shutdown();
}

#[tokio::test]
async fn test_mismatched_bytes_rejected() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();

    // alice's store holds bytes filed under a hash they do not match;
    // the store itself never verifies, the fetcher must
    let claimed = Hash::of(b"the real content");
    net.peer("alice")
        .unwrap()
        .store()
        .put(claimed, Bytes::from_static(b"forged content"))
        .await
        .unwrap();

    let bob = net.peer("bob").unwrap();
    let result = bob.fetch(&claimed).await.unwrap();
    assert!(result.is_none());
    // the forgery never lands in bob's store
    assert!(!bob.store().has(&claimed).await.unwrap());

    net.shutdown();
}

#[tokio::test]
async fn test_own_announcements_ignored() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("solo").await.unwrap();

    // the relay echoes our own hello back; announce twice to be sure
    let solo = net.peer("solo").unwrap();
    solo.manager().announce().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(solo.connected().is_empty());

    net.shutdown();
}

#[tokio::test]
async fn test_three_peer_race() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.add_peer("carol").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();
    net.wait_connected("alice", "carol").await.unwrap();
    net.wait_connected("bob", "carol").await.unwrap();

    // both alice and carol hold the block; bob races them
    let hash = net
        .peer("alice")
        .unwrap()
        .put_block(b"popular block")
        .await
        .unwrap();
    net.peer("carol")
        .unwrap()
        .put_block(b"popular block")
        .await
        .unwrap();

    let data = net.peer("bob").unwrap().fetch(&hash).await.unwrap();
    assert_eq!(data.unwrap().as_ref(), b"popular block");

    net.shutdown();
}

#[tokio::test]
async fn test_sync_chunked_file_block_by_block() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();

    // alice builds a multi-chunk file
    let alice_tree = common::tree::Tree::with_chunk_size(net.peer("alice").unwrap().store(), 8);
    let data = b"a file large enough to split into several chunks";
    let outcome = alice_tree.put_file(data).await.unwrap();

    // bob pulls the root, walks its links, and pulls every chunk
    let bob = net.peer("bob").unwrap();
    let root_bytes = bob.fetch(&outcome.cid.hash).await.unwrap().unwrap();
    let node = Node::decode(&root_bytes).unwrap();
    for link in node.links() {
        assert!(bob.fetch(&link.hash).await.unwrap().is_some());
    }

    // with all blocks local, bob's own tree reads the file
    let bob_tree = common::tree::Tree::with_chunk_size(bob.store(), 8);
    let read = bob_tree.read_file(&outcome.cid).await.unwrap().unwrap();
    assert_eq!(read, data);

    net.shutdown();
}

#[tokio::test]
async fn test_concurrent_fetches_multiplex() {
    init_tracing();
    let mut net = TestNetwork::new();
    net.add_peer("alice").await.unwrap();
    net.add_peer("bob").await.unwrap();
    net.wait_connected("alice", "bob").await.unwrap();

    let alice = net.peer("alice").unwrap();
    let mut hashes = Vec::new();
    for i in 0..20u8 {
        hashes.push(alice.put_block(&[i; 64]).await.unwrap());
    }

    let bob = net.peer("bob").unwrap();
    let fetches = hashes.iter().map(|hash| bob.fetch(hash));
    let results = futures::future::try_join_all(fetches).await.unwrap();

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().as_ref(), &[i as u8; 64]);
    }

    net.shutdown();
}
