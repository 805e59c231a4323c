use std::collections::{HashSet, VecDeque};

/// Bounded set of recently resolved dedupe keys with FIFO eviction.
#[derive(Debug)]
pub struct DedupeWindow {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Remember `key`, evicting the oldest entry when full.
    pub fn insert(&mut self, key: &str) {
        if self.keys.contains(key) {
            return;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.keys.remove(&oldest);
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
