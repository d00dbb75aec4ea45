use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use crate::block::{Block, BlockKey};
use crate::blockstore::Blockstore;
use crate::decision::DecisionEngine;
use crate::error::BitswapError;
use crate::message::Message;
use crate::network::Network;
use crate::notify::NotifyRegistry;
use crate::peer::PeerId;
use crate::retry::RetryPolicy;
use crate::stat::Stat;
use crate::wantlist::DEFAULT_PRIORITY;
use crate::want_manager::WantManager;

/// Knobs exposed to embedders.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub default_priority: i32,
    /// `hasBlock` retries up to 4 attempts, ~400ms apart, by default.
    pub put_retry: RetryPolicy,
    /// Bound on concurrent block ingestion inside `receiveMessage`.
    pub inbound_concurrency: usize,
    /// Number of envelope-loop workers the decision engine runs.
    pub envelope_loop_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            put_retry: RetryPolicy::fixed(4, Duration::from_millis(400)),
            inbound_concurrency: 10,
            envelope_loop_workers: 1,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    blocks_received: AtomicU64,
    dup_blocks_received: AtomicU64,
    dup_data_received: AtomicU64,
}

/// The top-level session: owns the want manager and decision engine, and
/// exposes the public `get`/`receiveMessage`/`hasBlock` surface.
pub struct Orchestrator<P: PeerId, B: Blockstore, N: Network<P>> {
    want_manager: WantManager<P, N>,
    decision: Arc<DecisionEngine<P, B, N>>,
    blockstore: Arc<B>,
    config: OrchestratorConfig,
    block_notify: NotifyRegistry<Block>,
    unwant_notify: NotifyRegistry<()>,
    counters: Counters,
    envelope_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl<P: PeerId, B: Blockstore + 'static, N: Network<P> + 'static> Orchestrator<P, B, N> {
    pub fn new(blockstore: Arc<B>, network: Arc<N>, config: OrchestratorConfig) -> Self {
        Self {
            want_manager: WantManager::new(Arc::clone(&network)),
            decision: Arc::new(DecisionEngine::new(Arc::clone(&blockstore), network)),
            blockstore,
            config,
            block_notify: NotifyRegistry::new(),
            unwant_notify: NotifyRegistry::new(),
            counters: Counters::default(),
            envelope_handles: AsyncMutex::new(Vec::new()),
        }
    }

    /// Spawns the decision engine's envelope-loop worker(s). Idempotent
    /// only in the sense that calling it twice spawns two extra workers;
    /// callers should pair one `start` with one `stop`.
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.envelope_handles.lock().await;
        for _ in 0..self.config.envelope_loop_workers.max(1) {
            let decision = Arc::clone(&self.decision);
            handles.push(tokio::spawn(decision.run_envelope_loop()));
        }
        debug!(workers = handles.len(), "orchestrator started");
    }

    /// Aborts envelope-loop workers and every per-peer want-list drain
    /// task. Ledgers and the local want-list are left intact.
    pub async fn stop(&self) {
        for handle in self.envelope_handles.lock().await.drain(..) {
            handle.abort();
        }
        self.want_manager.stop().await;
    }

    pub async fn connected(&self, peer: P) {
        self.want_manager.connected(peer).await;
    }

    pub async fn disconnected(&self, peer: &P) {
        self.want_manager.disconnected(peer).await;
        self.decision.peer_disconnected(peer).await;
    }

    /// Hands an inbound message to the decision engine, immediately
    /// broadcasts cancels for any delivered block we'd wanted (cutting
    /// down on duplicate deliveries already in flight), then ingests
    /// every block in the message with bounded concurrency. Delivered
    /// blocks are stored and counted whether or not we asked for them.
    pub async fn receive_message(&self, peer: P, mut msg: Message) -> Result<(), BitswapError> {
        trace!(?peer, entries = msg.entries.len(), blocks = msg.blocks.len(), "received message");
        self.decision.message_received(peer.clone(), msg.clone()).await;

        let blocks = std::mem::take(&mut msg.blocks);
        let mut keys_to_cancel = Vec::with_capacity(blocks.len());
        for block in &blocks {
            if self.want_manager.contains(&block.key).await {
                keys_to_cancel.push(block.key);
            } else {
                trace!(peer = ?peer, key = %block.key, "unwanted block");
            }
        }

        if !keys_to_cancel.is_empty() {
            self.want_manager.cancel_wants(keys_to_cancel).await;
        }

        let concurrency = self.config.inbound_concurrency.max(1);
        futures::stream::iter(blocks)
            .for_each_concurrent(concurrency, |block| async move {
                self.ingest_block(block).await;
            })
            .await;

        Ok(())
    }

    async fn ingest_block(&self, block: Block) {
        self.counters.blocks_received.fetch_add(1, Ordering::Relaxed);
        match self.blockstore.has(&block.key).await {
            Ok(true) => {
                self.counters.dup_blocks_received.fetch_add(1, Ordering::Relaxed);
                self.counters.dup_data_received.fetch_add(block.len() as u64, Ordering::Relaxed);
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(key = %block.key, error = %err, "blockstore.has failed while ingesting block");
            }
        }
        if let Err(err) = self.has_block(block).await {
            warn!(error = %err, "failed to store an ingested block");
        }
    }

    /// Announces a block as newly available: persists it (with retry),
    /// fires any waiting `get`s, and lets the decision engine queue
    /// delivery to peers who want it. Does not bump the
    /// `blocksReceived`/`dup*` counters; those count only blocks arriving
    /// through [`Self::receive_message`].
    pub async fn has_block(&self, block: Block) -> Result<(), BitswapError> {
        let key = block.key;
        let to_store = block.clone();
        crate::retry::retry_with_backoff(self.config.put_retry, || {
            let blockstore = Arc::clone(&self.blockstore);
            let block = to_store.clone();
            async move { blockstore.put(block).await }
        })
        .await
        .map_err(BitswapError::Blockstore)?;

        self.block_notify.fire(&key, block.clone());
        self.decision.received_block(&block).await;
        Ok(())
    }

    /// Force-cancels each key (regardless of pending `get` refcount) and
    /// wakes any waiter with [`BitswapError::ManualUnwant`].
    pub async fn unwant_blocks(&self, keys: impl IntoIterator<Item = BlockKey>) {
        let keys: Vec<BlockKey> = keys.into_iter().collect();
        self.want_manager.unwant_blocks(keys.clone()).await;
        for key in keys {
            self.unwant_notify.fire(&key, ());
        }
    }

    /// Decrements refcount for each key; a key only stops being wanted
    /// from peers once every caller that wanted it has cancelled.
    pub async fn cancel_wants(&self, keys: impl IntoIterator<Item = BlockKey>) {
        self.want_manager.cancel_wants(keys).await;
    }

    /// Fetches a single block: local hit short-circuits, otherwise wants
    /// it from peers and waits.
    pub async fn get_block(&self, key: BlockKey) -> Result<Block, BitswapError> {
        self.fetch_one(key).await
    }

    /// Concurrent version of [`Self::get_block`] over a stream of keys.
    /// Each key gets its own independent fetch; results arrive in
    /// completion order, not request order. The returned stream ends once
    /// `keys` is exhausted and every in-flight fetch has resolved.
    pub fn get_stream<S>(self: Arc<Self>, keys: S) -> impl Stream<Item = Result<Block, BitswapError>>
    where
        S: Stream<Item = BlockKey> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            tokio::pin!(keys);
            let mut inflight = Vec::new();
            while let Some(key) = keys.next().await {
                let this = Arc::clone(&self);
                let tx = tx.clone();
                inflight.push(tokio::spawn(async move {
                    let result = this.fetch_one(key).await;
                    let _ = tx.send(result);
                }));
            }
            for handle in inflight {
                let _ = handle.await;
            }
        });
        UnboundedReceiverStream::new(rx)
    }

    /// A `has` check, then (on miss) register waiters *before* wanting the
    /// block, then a second `has` check to catch a concurrent write that
    /// landed between the first check and registration.
    async fn fetch_one(&self, key: BlockKey) -> Result<Block, BitswapError> {
        if let Ok(true) = self.blockstore.has(&key).await {
            return self.blockstore.get(&key).await.map_err(BitswapError::Blockstore);
        }

        let block_rx = self.block_notify.register(key);
        let unwant_rx = self.unwant_notify.register(key);

        if let Ok(true) = self.blockstore.has(&key).await {
            self.block_notify.forget(&key);
            self.unwant_notify.forget(&key);
            return self.blockstore.get(&key).await.map_err(BitswapError::Blockstore);
        }

        self.want_manager.want_blocks([key], self.config.default_priority).await;

        let outcome = tokio::select! {
            block = block_rx => block.map_err(|_| BitswapError::Closing),
            _ = unwant_rx => Err(BitswapError::ManualUnwant(key.to_base58())),
        };

        self.block_notify.forget(&key);
        self.unwant_notify.forget(&key);
        self.want_manager.cancel_wants([key]).await;

        outcome
    }

    pub async fn stat(&self) -> Stat<P> {
        Stat {
            wantlist: self.want_manager.local_entries().await,
            blocks_received: self.counters.blocks_received.load(Ordering::Relaxed),
            dup_blocks_received: self.counters.dup_blocks_received.load(Ordering::Relaxed),
            dup_data_received: self.counters.dup_data_received.load(Ordering::Relaxed),
            peers: self.decision.peers().await,
            peer_stats: self.decision.peer_stats().await,
        }
    }

    pub async fn wantlist_for_peer(&self, peer: &P) -> Vec<crate::wantlist::WantEntry> {
        self.decision.wantlist_for_peer(peer).await
    }
}
