use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use keyed_priority_queue::KeyedPriorityQueue;
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock};
use tracing::{debug, trace, warn};

use crate::block::{Block, BlockKey};
use crate::blockstore::Blockstore;
use crate::ledger::Ledger;
use crate::message::Message;
use crate::network::Network;
use crate::peer::PeerId;
use crate::stat::PeerStat;
use crate::wantlist::WantEntry;

/// A single block owed to a single peer, queued for the envelope loop to
/// deliver.
#[derive(Debug, Clone)]
pub struct Task<P> {
    pub peer: P,
    pub key: BlockKey,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TaskPriority {
    priority: i32,
    seq: Reverse<u64>,
}

struct TaskQueueState<P: PeerId> {
    per_peer: HashMap<P, KeyedPriorityQueue<BlockKey, TaskPriority>>,
    /// Peers with at least one outstanding task, in round-robin service
    /// order: fair across peers, priority within a peer.
    order: VecDeque<P>,
    next_seq: u64,
}

/// Per-peer max-priority queues of [`Task`]s, served round-robin across
/// peers so one demanding peer can't starve the others.
struct TaskQueue<P: PeerId> {
    state: std::sync::Mutex<TaskQueueState<P>>,
    notify: Notify,
}

impl<P: PeerId> TaskQueue<P> {
    fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(TaskQueueState {
                per_peer: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn push(&self, peer: P, key: BlockKey, priority: i32) {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        let is_new_peer = !state.per_peer.contains_key(&peer);
        let queue = state.per_peer.entry(peer.clone()).or_default();
        // Re-wanting a key already queued for this peer just bumps its
        // priority; at most one outstanding task per (peer, key).
        match queue.get_priority(&key) {
            Some(existing) if existing.priority >= priority => {}
            _ => {
                queue.push(key, TaskPriority { priority, seq: Reverse(seq) });
            }
        }
        if is_new_peer {
            state.order.push_back(peer);
        }
        drop(state);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Task<P>> {
        let mut state = self.state.lock().unwrap();
        let rounds = state.order.len();
        for _ in 0..rounds {
            let Some(peer) = state.order.pop_front() else {
                break;
            };
            let Some(queue) = state.per_peer.get_mut(&peer) else {
                continue;
            };
            let Some((key, task_priority)) = queue.pop() else {
                state.per_peer.remove(&peer);
                continue;
            };
            if !queue.is_empty() {
                state.order.push_back(peer.clone());
            } else {
                state.per_peer.remove(&peer);
            }
            return Some(Task {
                peer,
                key,
                priority: task_priority.priority,
            });
        }
        None
    }

    async fn pop_wait(&self) -> Task<P> {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_pop() {
                return task;
            }
            notified.await;
        }
    }

    fn drop_peer(&self, peer: &P) {
        let mut state = self.state.lock().unwrap();
        state.per_peer.remove(peer);
        state.order.retain(|p| p != peer);
    }
}

/// Decides what to send in response to incoming want-lists and blocks.
/// Runs one or more envelope-loop workers draining [`Task`]s produced by
/// [`Self::message_received`] / [`Self::received_block`].
pub struct DecisionEngine<P: PeerId, B: Blockstore, N: Network<P>> {
    ledgers: RwLock<HashMap<P, Ledger>>,
    tasks: TaskQueue<P>,
    send_locks: std::sync::Mutex<HashMap<P, Arc<AsyncMutex<()>>>>,
    blockstore: Arc<B>,
    network: Arc<N>,
}

impl<P: PeerId, B: Blockstore + 'static, N: Network<P> + 'static> DecisionEngine<P, B, N> {
    pub fn new(blockstore: Arc<B>, network: Arc<N>) -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
            tasks: TaskQueue::new(),
            send_locks: std::sync::Mutex::new(HashMap::new()),
            blockstore,
            network,
        }
    }

    /// Processes an inbound message: folds want entries into the sending
    /// peer's ledger and enqueues a [`Task`] for every wanted key we
    /// already hold, then accounts received block bytes.
    pub async fn message_received(&self, peer: P, msg: Message) {
        let mut locally_held = Vec::new();
        {
            let mut ledgers = self.ledgers.write().await;
            let ledger = ledgers.entry(peer.clone()).or_insert_with(Ledger::new);
            if msg.full {
                ledger.wants = crate::wantlist::WantList::new();
            }
            for entry in &msg.entries {
                if entry.cancel {
                    ledger.wants.remove_force(&entry.key);
                } else {
                    ledger.wants.add(entry.key, entry.priority);
                    locally_held.push((entry.key, entry.priority));
                }
            }
            for block in &msg.blocks {
                ledger.bytes_recv += block.len() as u64;
            }
            ledger.exchange_count += 1;
        }

        for (key, priority) in locally_held {
            if matches!(self.blockstore.has(&key).await, Ok(true)) {
                self.tasks.push(peer.clone(), key, priority);
            }
        }
    }

    /// A block newly became available locally; enqueue delivery to every
    /// peer whose ledger wants it, and clear it from their want-lists.
    pub async fn received_block(&self, block: &Block) {
        let mut ledgers = self.ledgers.write().await;
        for (peer, ledger) in ledgers.iter_mut() {
            if let Some(entry) = ledger.wants.remove_force(&block.key) {
                self.tasks.push(peer.clone(), block.key, entry.priority);
            }
        }
    }

    pub async fn peer_disconnected(&self, peer: &P) {
        self.tasks.drop_peer(peer);
        debug!(?peer, "decision engine dropped queued tasks for disconnected peer");
    }

    pub async fn wantlist_for_peer(&self, peer: &P) -> Vec<WantEntry> {
        self.ledgers
            .read()
            .await
            .get(peer)
            .map(|l| l.wants.entries())
            .unwrap_or_default()
    }

    pub async fn peers(&self) -> Vec<P> {
        self.ledgers.read().await.keys().cloned().collect()
    }

    pub async fn peer_stats(&self) -> Vec<(P, PeerStat)> {
        self.ledgers
            .read()
            .await
            .iter()
            .map(|(peer, ledger)| {
                (
                    peer.clone(),
                    PeerStat {
                        bytes_sent: ledger.bytes_sent,
                        bytes_recv: ledger.bytes_recv,
                    },
                )
            })
            .collect()
    }

    async fn send_lock(&self, peer: &P) -> Arc<AsyncMutex<()>> {
        self.send_locks
            .lock()
            .unwrap()
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Runs one envelope-loop worker: pops a [`Task`], reads the block from
    /// the blockstore, and sends it. A per-peer lock keeps at most one
    /// outbound send in flight per peer even when several workers run
    /// concurrently. Never returns; spawn it and hold the `JoinHandle` to
    /// stop it later.
    pub async fn run_envelope_loop(self: Arc<Self>) {
        loop {
            let task = self.tasks.pop_wait().await;
            let block = match self.blockstore.get(&task.key).await {
                Ok(block) => block,
                Err(err) => {
                    trace!(peer = ?task.peer, key = %task.key, error = %err, "task block no longer available, dropping");
                    continue;
                }
            };

            let lock = self.send_lock(&task.peer).await;
            let _guard = lock.lock().await;
            let len = block.len() as u64;
            match self.network.send_message(&task.peer, Message::with_blocks(vec![block])).await {
                Ok(()) => {
                    let mut ledgers = self.ledgers.write().await;
                    if let Some(ledger) = ledgers.get_mut(&task.peer) {
                        ledger.bytes_sent += len;
                        ledger.exchange_count += 1;
                    }
                }
                Err(err) => {
                    warn!(peer = ?task.peer, key = %task.key, error = %err, "failed to deliver block");
                }
            }
        }
    }
}
