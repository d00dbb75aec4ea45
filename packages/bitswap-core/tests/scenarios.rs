//! End-to-end scenarios exercising the want manager, decision engine and
//! orchestrator together through the `bitswap-testutil` fakes.

use std::sync::Arc;
use std::time::Duration;

use bitswap_core::{BitswapError, Block, BlockKey, Message, Orchestrator, OrchestratorConfig, WantEntry};
use bitswap_testutil::{spawn_inbound_pump, Hub, InProcessNetwork, MemoryBlockstore, PeerId};
use bytes::Bytes;
use multihash::Multihash;
use sha2::{Digest, Sha256};

fn key(data: &[u8]) -> BlockKey {
    let digest = Sha256::digest(data);
    BlockKey::new(Multihash::wrap(0x12, &digest).unwrap())
}

fn block(data: &[u8]) -> Block {
    Block::new(key(data), Bytes::copy_from_slice(data))
}

async fn node(hub: &Arc<Hub>) -> (PeerId, Arc<Orchestrator<PeerId, MemoryBlockstore, InProcessNetwork>>) {
    let id = PeerId::random();
    let (net, rx) = hub.node(id);
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(MemoryBlockstore::new()), net, OrchestratorConfig::default()));
    orchestrator.start().await;
    spawn_inbound_pump(Arc::clone(&orchestrator), rx);
    (id, orchestrator)
}

#[tokio::test]
async fn simple_ingest_counts_and_stores_fresh_blocks_even_when_unsolicited() {
    let hub = Hub::new();
    let (sender_id, _sender) = node(&hub).await;
    let (_, receiver) = node(&hub).await;

    let b1 = block(b"one");
    let b2 = block(b"two");
    receiver
        .receive_message(sender_id, Message::with_blocks(vec![b1.clone(), b2.clone()]))
        .await
        .unwrap();

    let stat = receiver.stat().await;
    assert_eq!(stat.blocks_received, 2);
    assert_eq!(stat.dup_blocks_received, 0);
    assert_eq!(receiver.get_block(b1.key).await.unwrap().data, b1.data);
    assert_eq!(receiver.get_block(b2.key).await.unwrap().data, b2.data);
}

#[tokio::test]
async fn want_ingest_populates_wantlist_for_peer_without_touching_blocks() {
    let hub = Hub::new();
    let (peer_id, _peer) = node(&hub).await;
    let (_, receiver) = node(&hub).await;

    let b1 = key(b"one");
    let b2 = key(b"two");
    let entries = vec![
        WantEntry { key: b1, priority: 1, cancel: false, refcount: 1 },
        WantEntry { key: b2, priority: 1, cancel: false, refcount: 1 },
    ];
    receiver.receive_message(peer_id, Message::new_full(entries)).await.unwrap();

    let wantlist = receiver.wantlist_for_peer(&peer_id).await;
    let keys: Vec<_> = wantlist.iter().map(|e| e.key).collect();
    assert!(keys.contains(&b1));
    assert!(keys.contains(&b2));
    assert_eq!(receiver.stat().await.blocks_received, 0);
}

#[tokio::test]
async fn multi_peer_fanout_delivers_all_blocks_from_five_peers() {
    let hub = Hub::new();
    let (_, receiver) = node(&hub).await;

    let mut expected = Vec::new();
    for i in 0..5u8 {
        let (peer_id, _peer) = node(&hub).await;
        let a = block(&[i, 0]);
        let b = block(&[i, 1]);
        receiver
            .receive_message(peer_id, Message::with_blocks(vec![a.clone(), b.clone()]))
            .await
            .unwrap();
        expected.push(a);
        expected.push(b);
    }

    let stat = receiver.stat().await;
    assert_eq!(stat.blocks_received, 10);
    for b in expected {
        assert_eq!(receiver.get_block(b.key).await.unwrap().data, b.data);
    }
}

#[tokio::test]
async fn local_hit_never_touches_the_network() {
    let hub = Hub::new();
    let (_, node_a) = node(&hub).await;
    let b = block(b"already-have-it");
    node_a.has_block(b.clone()).await.unwrap();

    let fetched = node_a.get_block(b.key).await.unwrap();
    assert_eq!(fetched.data, b.data);
}

#[tokio::test]
async fn late_local_add_resolves_a_pending_get() {
    let hub = Hub::new();
    let (_, node_a) = node(&hub).await;
    let b = block(b"arrives-late");

    let waiting = tokio::spawn({
        let node_a = Arc::clone(&node_a);
        let key = b.key;
        async move { node_a.get_block(key).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    node_a.has_block(b.clone()).await.unwrap();

    let resolved = waiting.await.unwrap().unwrap();
    assert_eq!(resolved.data, b.data);
}

#[tokio::test]
async fn inter_node_exchange_resolves_and_suppresses_redelivery() {
    let hub = Hub::new();
    let (a_id, node_a) = node(&hub).await;
    let (b_id, node_b) = node(&hub).await;
    node_a.connected(b_id).await;
    node_b.connected(a_id).await;

    let b = block(b"cross-node");
    let waiting = tokio::spawn({
        let node_a = Arc::clone(&node_a);
        let key = b.key;
        async move { node_a.get_block(key).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    node_b.has_block(b.clone()).await.unwrap();

    let resolved = waiting.await.unwrap().unwrap();
    assert_eq!(resolved.data, b.data);

    // A's want was cancelled on delivery; a redundant unsolicited copy
    // from B still gets counted and deduplicated, but is not re-emitted
    // to any pending `get` (there is none left).
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stat_before = node_a.stat().await;
    node_a.receive_message(b_id, Message::with_blocks(vec![b.clone()])).await.unwrap();
    let stat_after = node_a.stat().await;
    assert_eq!(stat_after.blocks_received, stat_before.blocks_received + 1);
    assert_eq!(stat_after.dup_blocks_received, stat_before.dup_blocks_received + 1, "already-stored block is a dup");
}

#[tokio::test]
async fn manual_unwant_fails_both_concurrent_waiters() {
    let hub = Hub::new();
    let (_, node_a) = node(&hub).await;
    let k = key(b"unwanted");

    let w1 = tokio::spawn({
        let node_a = Arc::clone(&node_a);
        async move { node_a.get_block(k).await }
    });
    let w2 = tokio::spawn({
        let node_a = Arc::clone(&node_a);
        async move { node_a.get_block(k).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    node_a.unwant_blocks([k]).await;

    let r1 = w1.await.unwrap();
    let r2 = w2.await.unwrap();
    assert!(matches!(r1, Err(BitswapError::ManualUnwant(ref msg)) if msg == &k.to_base58()));
    assert!(matches!(r2, Err(BitswapError::ManualUnwant(ref msg)) if msg == &k.to_base58()));

    let stat = node_a.stat().await;
    assert!(!stat.wantlist.iter().any(|e| e.key == k));
}

#[tokio::test]
async fn empty_inbound_message_changes_nothing() {
    let hub = Hub::new();
    let (peer_id, _peer) = node(&hub).await;
    let (_, receiver) = node(&hub).await;

    let before = receiver.stat().await;
    receiver.receive_message(peer_id, Message::default()).await.unwrap();
    let after = receiver.stat().await;

    assert_eq!(before.blocks_received, after.blocks_received);
    assert_eq!(before.wantlist.len(), after.wantlist.len());
}

#[tokio::test]
async fn cancel_only_message_removes_wants_without_touching_blocks() {
    let hub = Hub::new();
    let (peer_id, _peer) = node(&hub).await;
    let (_, receiver) = node(&hub).await;

    let k = key(b"to-cancel");
    receiver
        .receive_message(peer_id, Message::new_full(vec![WantEntry { key: k, priority: 1, cancel: false, refcount: 1 }]))
        .await
        .unwrap();
    assert!(receiver.wantlist_for_peer(&peer_id).await.iter().any(|e| e.key == k));

    receiver
        .receive_message(peer_id, Message::new_delta(vec![WantEntry { key: k, priority: 0, cancel: true, refcount: 0 }]))
        .await
        .unwrap();

    assert!(!receiver.wantlist_for_peer(&peer_id).await.iter().any(|e| e.key == k));
    assert_eq!(receiver.stat().await.blocks_received, 0);
}
