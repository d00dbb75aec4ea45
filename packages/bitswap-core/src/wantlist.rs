use std::cmp::Reverse;
use std::collections::HashMap;

use crate::block::BlockKey;

/// Default priority assigned to a want when the caller doesn't pick one.
pub const DEFAULT_PRIORITY: i32 = 1;

/// One entry in a [`WantList`]. `priority` breaks ties on the outgoing
/// side; `refcount` is the number of independent local callers keeping
/// this key alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantEntry {
    pub key: BlockKey,
    pub priority: i32,
    pub cancel: bool,
    pub refcount: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: WantEntry,
    insertion_index: u64,
}

/// Ordered, reference-counted mapping `BlockKey -> WantEntry`.
///
/// Plain data structure: no internal synchronization. Callers that share a
/// `WantList` across tasks (the [`crate::want_manager::WantManager`], the
/// per-peer [`crate::ledger::Ledger`]) are responsible for their own
/// locking.
#[derive(Debug, Default)]
pub struct WantList {
    entries: HashMap<BlockKey, Slot>,
    next_index: u64,
}

impl WantList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments refcount if the key is already present (raising priority
    /// to the max of old and new); otherwise inserts a fresh entry with
    /// refcount 1.
    pub fn add(&mut self, key: BlockKey, priority: i32) -> &WantEntry {
        let next_index = self.next_index;
        let is_new = !self.entries.contains_key(&key);
        let slot = self.entries.entry(key).or_insert_with(|| Slot {
            entry: WantEntry {
                key,
                priority,
                cancel: false,
                refcount: 0,
            },
            insertion_index: next_index,
        });
        slot.entry.refcount += 1;
        slot.entry.priority = slot.entry.priority.max(priority);
        if is_new {
            self.next_index += 1;
        }
        &slot.entry
    }

    /// Decrements refcount; when it reaches zero the entry is removed and
    /// returned so the caller can emit a cancel notice.
    pub fn remove(&mut self, key: &BlockKey) -> Option<WantEntry> {
        let slot = self.entries.get_mut(key)?;
        if slot.entry.refcount > 0 {
            slot.entry.refcount -= 1;
        }
        if slot.entry.refcount == 0 {
            self.entries.remove(key).map(|s| s.entry)
        } else {
            None
        }
    }

    /// Removes the entry regardless of refcount, always returning it if
    /// present.
    pub fn remove_force(&mut self, key: &BlockKey) -> Option<WantEntry> {
        self.entries.remove(key).map(|s| s.entry)
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &BlockKey) -> Option<&WantEntry> {
        self.entries.get(key).map(|s| &s.entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable snapshot ordered by `(-priority, insertion_index)`.
    pub fn entries(&self) -> Vec<WantEntry> {
        let mut snapshot: Vec<&Slot> = self.entries.values().collect();
        snapshot.sort_by_key(|slot| (Reverse(slot.entry.priority), slot.insertion_index));
        snapshot.into_iter().map(|slot| slot.entry.clone()).collect()
    }
}
