use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::block::BlockKey;
use crate::message::Message;
use crate::network::Network;
use crate::peer::PeerId;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::wantlist::{WantEntry, WantList};

/// Default retry schedule for a peer's outbound message queue: capped
/// exponential backoff that never gives up on its own. The per-peer drain
/// task is killed by `disconnected`, which is what actually bounds the
/// retrying.
fn default_send_retry() -> RetryPolicy {
    RetryPolicy::exponential(u32::MAX, Duration::from_millis(200), Duration::from_secs(30))
}

#[derive(Default)]
struct Pending {
    /// `Some` means the next outbound message to this peer must be a full
    /// snapshot (sent once, right after `connected`). Any adds/cancels
    /// queued while this is still pending are folded into the snapshot by
    /// `take_message` rather than sent or dropped separately.
    full_entries: Option<Vec<WantEntry>>,
    adds: HashMap<BlockKey, WantEntry>,
    cancels: HashSet<BlockKey>,
}

impl Pending {
    fn take_message(&mut self) -> Option<Message> {
        if let Some(mut entries) = self.full_entries.take() {
            // Adds/cancels queued after the snapshot but before the drain
            // loop picked it up still need to reach this peer; fold them
            // into the snapshot rather than dropping them.
            let mut by_key: HashMap<BlockKey, WantEntry> =
                entries.drain(..).map(|e| (e.key, e)).collect();
            for (key, entry) in self.adds.drain() {
                by_key.insert(key, entry);
            }
            for key in self.cancels.drain() {
                by_key.remove(&key);
            }
            return Some(Message::new_full(by_key.into_values().collect()));
        }
        if self.adds.is_empty() && self.cancels.is_empty() {
            return None;
        }
        let mut entries: Vec<WantEntry> = self.adds.drain().map(|(_, e)| e).collect();
        for key in self.cancels.drain() {
            entries.push(WantEntry {
                key,
                priority: 0,
                cancel: true,
                refcount: 0,
            });
        }
        Some(Message::new_delta(entries))
    }
}

/// Coalesces pending additions and cancels for one peer into at most one
/// in-flight message at a time.
struct PeerQueue {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl PeerQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            notify: Notify::new(),
        }
    }

    fn queue_full_snapshot(&self, entries: Vec<WantEntry>) {
        let mut pending = self.pending.lock().unwrap();
        pending.full_entries = Some(entries);
        self.notify.notify_one();
    }

    fn queue_add(&self, entry: WantEntry) {
        let mut pending = self.pending.lock().unwrap();
        pending.cancels.remove(&entry.key);
        pending.adds.insert(entry.key, entry);
        self.notify.notify_one();
    }

    fn queue_cancel(&self, key: BlockKey) {
        let mut pending = self.pending.lock().unwrap();
        pending.adds.remove(&key);
        pending.cancels.insert(key);
        self.notify.notify_one();
    }

    async fn run<P: PeerId, N: Network<P>>(self: Arc<Self>, peer: P, network: Arc<N>, policy: RetryPolicy) {
        loop {
            let notified = self.notify.notified();
            let next = self.pending.lock().unwrap().take_message();
            let Some(msg) = next else {
                notified.await;
                continue;
            };

            let result = retry_with_backoff(policy, || {
                let network = Arc::clone(&network);
                let peer = peer.clone();
                let msg = msg.clone();
                async move { network.send_message(&peer, msg).await }
            })
            .await;

            if let Err(err) = result {
                warn!(?peer, error = %err, "giving up on a want-list message to peer");
            } else {
                trace!(?peer, "delivered want-list message");
            }
        }
    }
}

/// Owns the local outgoing [`WantList`] and fans its state out to every
/// connected peer.
pub struct WantManager<P: PeerId, N: Network<P>> {
    local_wantlist: RwLock<WantList>,
    queues: RwLock<HashMap<P, (Arc<PeerQueue>, JoinHandle<()>)>>,
    network: Arc<N>,
    retry_policy: RetryPolicy,
}

impl<P: PeerId, N: Network<P> + 'static> WantManager<P, N> {
    pub fn new(network: Arc<N>) -> Self {
        Self::with_retry_policy(network, default_send_retry())
    }

    pub fn with_retry_policy(network: Arc<N>, retry_policy: RetryPolicy) -> Self {
        Self {
            local_wantlist: RwLock::new(WantList::new()),
            queues: RwLock::new(HashMap::new()),
            network,
            retry_policy,
        }
    }

    pub async fn local_entries(&self) -> Vec<WantEntry> {
        self.local_wantlist.read().await.entries()
    }

    pub async fn contains(&self, key: &BlockKey) -> bool {
        self.local_wantlist.read().await.contains(key)
    }

    /// Adds each key to the local want-list and enqueues a delta add to
    /// every connected peer.
    pub async fn want_blocks(&self, keys: impl IntoIterator<Item = BlockKey>, priority: i32) {
        let mut added = Vec::new();
        {
            let mut list = self.local_wantlist.write().await;
            for key in keys {
                added.push(list.add(key, priority).clone());
            }
        }
        if added.is_empty() {
            return;
        }
        let queues = self.queues.read().await;
        for (queue, _) in queues.values() {
            for entry in &added {
                queue.queue_add(entry.clone());
            }
        }
    }

    /// Decrements refcount for each key; any key whose refcount falls to
    /// zero is cancelled with every connected peer.
    pub async fn cancel_wants(&self, keys: impl IntoIterator<Item = BlockKey>) {
        let mut cancelled = Vec::new();
        {
            let mut list = self.local_wantlist.write().await;
            for key in keys {
                if list.remove(&key).is_some() {
                    cancelled.push(key);
                }
            }
        }
        self.broadcast_cancels(cancelled).await;
    }

    /// Force-removes each key regardless of refcount and broadcasts the
    /// cancel; notifying local waiters is the orchestrator's job.
    pub async fn unwant_blocks(&self, keys: impl IntoIterator<Item = BlockKey>) {
        let mut cancelled = Vec::new();
        {
            let mut list = self.local_wantlist.write().await;
            for key in keys {
                if list.remove_force(&key).is_some() {
                    cancelled.push(key);
                }
            }
        }
        self.broadcast_cancels(cancelled).await;
    }

    async fn broadcast_cancels(&self, keys: Vec<BlockKey>) {
        if keys.is_empty() {
            return;
        }
        let queues = self.queues.read().await;
        for (queue, _) in queues.values() {
            for key in &keys {
                queue.queue_cancel(*key);
            }
        }
    }

    /// Ensures a queue exists for `peer` and enqueues a full want-list
    /// snapshot as its first message.
    pub async fn connected(&self, peer: P) {
        let snapshot = self.local_wantlist.read().await.entries();
        let mut queues = self.queues.write().await;
        if queues.contains_key(&peer) {
            return;
        }
        let queue = Arc::new(PeerQueue::new());
        queue.queue_full_snapshot(snapshot);
        let handle = tokio::spawn(Arc::clone(&queue).run(peer.clone(), Arc::clone(&self.network), self.retry_policy));
        queues.insert(peer, (queue, handle));
    }

    pub async fn disconnected(&self, peer: &P) {
        if let Some((_, handle)) = self.queues.write().await.remove(peer) {
            handle.abort();
        }
        debug!(?peer, "want manager torn down peer queue");
    }

    /// Aborts every per-peer drain task. Queued state is discarded; a
    /// reconnect starts fresh with a full snapshot.
    pub async fn stop(&self) {
        for (_, (_, handle)) in self.queues.write().await.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::test_key;
    use crate::error::NetworkError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingNetwork {
        sent: tokio::sync::Mutex<Vec<(u32, Message)>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Network<u32> for RecordingNetwork {
        async fn connect_to(&self, _peer: &u32) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn send_message(&self, peer: &u32, msg: Message) -> Result<(), NetworkError> {
            self.sent.lock().await.push((*peer, msg));
            Ok(())
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn connected_peer_gets_a_full_snapshot_first() {
        let network = Arc::new(RecordingNetwork::default());
        let manager = WantManager::new(Arc::clone(&network));
        let key = test_key(b"a");
        manager.want_blocks([key], 1).await;

        manager.connected(1u32).await;

        wait_until(|| !network.sent.try_lock().unwrap().is_empty()).await;
        let sent = network.sent.lock().await;
        assert!(sent[0].1.full, "first message to a new peer is a full snapshot");
        assert_eq!(sent[0].1.entries.len(), 1);
    }

    #[tokio::test]
    async fn want_then_cancel_broadcasts_both() {
        let network = Arc::new(RecordingNetwork::default());
        let manager = WantManager::new(Arc::clone(&network));
        manager.connected(1u32).await;
        wait_until(|| !network.sent.try_lock().unwrap().is_empty()).await; // drain initial empty snapshot

        let key = test_key(b"a");
        manager.want_blocks([key], 1).await;
        wait_until(|| network.sent.try_lock().unwrap().len() >= 2).await;

        manager.cancel_wants([key]).await;
        wait_until(|| network.sent.try_lock().unwrap().len() >= 3).await;

        let sent = network.sent.lock().await;
        assert!(sent[1].1.entries.iter().any(|e| e.key == key && !e.cancel));
        assert!(sent[2].1.entries.iter().any(|e| e.key == key && e.cancel));
    }

    #[tokio::test]
    async fn disconnected_stops_future_sends() {
        let network = Arc::new(RecordingNetwork::default());
        let manager = WantManager::new(Arc::clone(&network));
        manager.connected(1u32).await;
        wait_until(|| !network.sent.try_lock().unwrap().is_empty()).await;

        manager.disconnected(&1u32).await;
        let before = network.sent.lock().await.len();

        manager.want_blocks([test_key(b"a")], 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(network.sent.lock().await.len(), before, "no queue left to drain");
    }
}
