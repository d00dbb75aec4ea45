use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::block::BlockKey;

/// A keyed, multi-waiter, fire-once notification registry.
///
/// Keyed by the binary [`BlockKey`] rather than a string, so the hot path
/// avoids base58 formatting. `register` and `fire` are independently
/// atomic (each holds the map lock for the duration of its own
/// operation). Closing the race between a concurrent store write and
/// waiter registration is the caller's job via a recheck-after-register
/// pattern; the authoritative state lives in the blockstore, not here.
///
/// Every registered waiter for a key fires exactly once, then the key's
/// waiter list is cleared. Firing is edge-triggered, not level-triggered.
#[derive(Default)]
pub struct NotifyRegistry<V: Clone> {
    waiters: Mutex<HashMap<BlockKey, Vec<oneshot::Sender<V>>>>,
}

impl<V: Clone> NotifyRegistry<V> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a fresh one-shot waiter for `key`. Callers that need to
    /// close the register/store-write race must re-check the authoritative
    /// state (e.g. `blockstore.has(key)`) immediately after calling this:
    /// a write that completed *before* this call is caught by that
    /// recheck; a write that completes *after* is caught by this waiter.
    pub fn register(&self, key: BlockKey) -> oneshot::Receiver<V> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().entry(key).or_default().push(tx);
        rx
    }

    /// Fires every waiter currently registered for `key` with a clone of
    /// `value`, then drops the registration. A waiter whose receiver was
    /// already dropped (caller gave up) is silently skipped.
    pub fn fire(&self, key: &BlockKey, value: V) {
        if let Some(txs) = self.waiters.lock().unwrap().remove(key) {
            for tx in txs {
                let _ = tx.send(value.clone());
            }
        }
    }

    /// Drops any registration for `key` without firing it. Used when a
    /// waiter cancels itself (e.g. the `getStream` sink ends).
    pub fn forget(&self, key: &BlockKey) {
        self.waiters.lock().unwrap().remove(key);
    }

    #[cfg(test)]
    fn waiter_count(&self, key: &BlockKey) -> usize {
        self.waiters
            .lock()
            .unwrap()
            .get(key)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::test_key;

    #[tokio::test]
    async fn fire_resolves_all_registered_waiters() {
        let registry: NotifyRegistry<u32> = NotifyRegistry::new();
        let key = test_key(b"a");

        let rx1 = registry.register(key);
        let rx2 = registry.register(key);
        assert_eq!(registry.waiter_count(&key), 2);

        registry.fire(&key, 42);

        assert_eq!(rx1.await.unwrap(), 42);
        assert_eq!(rx2.await.unwrap(), 42);
        assert_eq!(registry.waiter_count(&key), 0, "firing clears the registration");
    }

    #[tokio::test]
    async fn fire_with_no_waiters_is_a_no_op() {
        let registry: NotifyRegistry<u32> = NotifyRegistry::new();
        registry.fire(&test_key(b"a"), 1);
    }

    #[tokio::test]
    async fn forget_drops_without_firing() {
        let registry: NotifyRegistry<u32> = NotifyRegistry::new();
        let key = test_key(b"a");
        let rx = registry.register(key);
        registry.forget(&key);
        assert!(rx.await.is_err(), "dropped sender yields a recv error");
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let registry: NotifyRegistry<u32> = NotifyRegistry::new();
        let a = test_key(b"a");
        let b = test_key(b"b");

        let rx_a = registry.register(a);
        let rx_b = registry.register(b);

        registry.fire(&a, 1);
        assert_eq!(rx_a.await.unwrap(), 1);
        assert_eq!(registry.waiter_count(&b), 1, "b's waiter is untouched");

        registry.fire(&b, 2);
        assert_eq!(rx_b.await.unwrap(), 2);
    }
}
