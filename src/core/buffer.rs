//! FIFO-trimmed bounded buffers.
//!
//! Every insert that pushes a buffer past its capacity evicts the oldest
//! excess entries, so the length never exceeds the capacity once an
//! operation returns.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::VecDeque;

/// A bounded list that discards its oldest elements when full.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Append an item, returning how many old items were evicted.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        let excess = self.items.len().saturating_sub(self.capacity);
        self.items.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedBuffer<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.items.iter())
    }
}

/// Capacity of every bounded container the collector owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLimits {
    pub mouse_movements: usize,
    pub clicks: usize,
    pub interactions: usize,
    pub errors: usize,
    /// Samples kept per API endpoint
    pub api_latency_samples: usize,
    pub resource_timings: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            mouse_movements: 150,
            clicks: 200,
            interactions: 250,
            errors: 50,
            api_latency_samples: 25,
            resource_timings: 120,
        }
    }
}
