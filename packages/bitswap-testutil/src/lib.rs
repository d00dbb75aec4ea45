//! In-memory `Blockstore` and in-process `Network` fakes for exercising
//! `bitswap-core` without a real transport or disk-backed store.
//!
//! [`Hub`] plays the role a libp2p swarm's dial/stream layer would: every
//! node registers with it and gets back a [`InProcessNetwork`] handle
//! (tagged with that node's own identity) plus the inbound channel the
//! node should pump into its [`bitswap_core::Orchestrator::receive_message`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use bitswap_core::{Block, BlockKey, Blockstore, BlockstoreError, Message, Network, NetworkError, Orchestrator};

pub use libp2p_identity::PeerId;

/// A flat, lock-guarded map standing in for a real content-addressed
/// store. No eviction, no persistence; fine for tests and the demo
/// binary, not for production use.
#[derive(Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<BlockKey, Block>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn has(&self, key: &BlockKey) -> Result<bool, BlockstoreError> {
        Ok(self.blocks.read().await.contains_key(key))
    }

    async fn get(&self, key: &BlockKey) -> Result<Block, BlockstoreError> {
        self.blocks
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(BlockstoreError::NotFound(*key))
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        self.blocks.write().await.insert(block.key, block);
        Ok(())
    }
}

/// The shared routing table linking every node registered in one test or
/// demo process.
pub struct Hub {
    inboxes: StdRwLock<HashMap<PeerId, mpsc::UnboundedSender<(PeerId, Message)>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: StdRwLock::new(HashMap::new()),
        })
    }

    /// Registers `id` with the hub. Returns a [`Network`] handle that
    /// sends as `id`, and the receiver end of `id`'s inbound channel; feed
    /// the latter to [`spawn_inbound_pump`].
    pub fn node(self: &Arc<Self>, id: PeerId) -> (Arc<InProcessNetwork>, mpsc::UnboundedReceiver<(PeerId, Message)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().unwrap().insert(id, tx);
        (
            Arc::new(InProcessNetwork {
                hub: Arc::clone(self),
                self_id: id,
            }),
            rx,
        )
    }

    pub fn remove(&self, id: &PeerId) {
        self.inboxes.write().unwrap().remove(id);
    }
}

/// A [`Network`] handle bound to one node's identity, routing through a
/// shared [`Hub`] instead of an actual transport.
pub struct InProcessNetwork {
    hub: Arc<Hub>,
    self_id: PeerId,
}

#[async_trait]
impl Network<PeerId> for InProcessNetwork {
    async fn connect_to(&self, peer: &PeerId) -> Result<(), NetworkError> {
        if self.hub.inboxes.read().unwrap().contains_key(peer) {
            Ok(())
        } else {
            Err(NetworkError::UnknownPeer)
        }
    }

    async fn send_message(&self, peer: &PeerId, msg: Message) -> Result<(), NetworkError> {
        let tx = {
            let inboxes = self.hub.inboxes.read().unwrap();
            inboxes.get(peer).cloned().ok_or(NetworkError::UnknownPeer)?
        };
        tx.send((self.self_id, msg))
            .map_err(|err| NetworkError::SendFailed(Box::new(err)))
    }
}

/// Spawns a task that forwards everything arriving on `rx` into
/// `orchestrator.receive_message`. Mirrors the role a real swarm event
/// loop plays in wiring inbound frames to the orchestrator.
pub fn spawn_inbound_pump<B, N>(
    orchestrator: Arc<Orchestrator<PeerId, B, N>>,
    mut rx: mpsc::UnboundedReceiver<(PeerId, Message)>,
) -> JoinHandle<()>
where
    B: Blockstore + 'static,
    N: Network<PeerId> + 'static,
{
    tokio::spawn(async move {
        while let Some((from, msg)) = rx.recv().await {
            if let Err(err) = orchestrator.receive_message(from, msg).await {
                warn!(peer = ?from, error = %err, "failed to ingest inbound message");
            }
        }
    })
}
