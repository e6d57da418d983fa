//! Pending-load queue.
//!
//! Entries live in a generation-checked slot map; a deque of keys records the
//! FIFO order. Removing an entry out of order only frees its slot, the stale
//! key left in the deque no longer resolves and is skipped when popped.
//!
//! The queue itself is not synchronized. `ResourceCache` keeps it behind its
//! queue lock together with every transition into or out of `Queued`.

use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::resource::Loadable;

new_key_type! {
    /// Membership key of a queued resource.
    pub struct QueueKey;
}

#[derive(Default)]
pub(crate) struct LoadQueue {
    slots: SlotMap<QueueKey, Arc<dyn Loadable>>,
    order: VecDeque<QueueKey>,
}

impl LoadQueue {
    /// Pushes to the head. The queue keeps a strong reference until the
    /// entry is popped or removed.
    pub fn push(&mut self, resource: Arc<dyn Loadable>) -> QueueKey {
        let key = self.slots.insert(resource);
        self.order.push_front(key);
        key
    }

    /// Removes an entry wherever it sits in the queue.
    pub fn remove(&mut self, key: QueueKey) -> Option<Arc<dyn Loadable>> {
        let removed = self.slots.remove(key);
        if self.order.len() > self.slots.len() * 2 + 16 {
            let slots = &self.slots;
            self.order.retain(|k| slots.contains_key(*k));
        }
        removed
    }

    /// Pops the oldest entry (the tail).
    pub fn pop_back(&mut self) -> Option<Arc<dyn Loadable>> {
        while let Some(key) = self.order.pop_back() {
            if let Some(resource) = self.slots.remove(key) {
                return Some(resource);
            }
        }
        None
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
