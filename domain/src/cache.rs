//! Bounded FIFO cache keyed by entity id.
//!
//! Eviction removes the earliest-inserted key when the cache is full. Reads
//! do not reorder entries, so this is deliberately not an LRU.

use std::collections::{HashMap, VecDeque};

use crate::EntityId;

#[derive(Debug)]
pub struct FifoCache<T> {
    entries: HashMap<EntityId, T>,
    order: VecDeque<EntityId>,
    max_size: usize,
}

impl<T> FifoCache<T> {
    /// A `max_size` of zero disables caching entirely.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert a value, evicting the oldest entry first if full. Returns the
    /// evicted key, if any. Re-inserting a cached key replaces its value and
    /// keeps its original position.
    pub fn insert(&mut self, id: EntityId, value: T) -> Option<EntityId> {
        if self.max_size == 0 {
            return None;
        }
        if let Some(slot) = self.entries.get_mut(&id) {
            *slot = value;
            return None;
        }
        let mut evicted = None;
        if self.entries.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        self.order.push_back(id);
        self.entries.insert(id, value);
        evicted
    }

    /// Replace the value only if `id` is already cached.
    pub fn refresh(&mut self, id: EntityId, value: T) -> bool {
        match self.entries.get_mut(&id) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let removed = self.entries.remove(&id);
        if removed.is_some() {
            self.order.retain(|k| *k != id);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
