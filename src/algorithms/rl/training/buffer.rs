//! Fixed-capacity replay buffer.

use std::collections::VecDeque;

use rand::seq::index::sample;
use rand::Rng;

/// Ring buffer of experiences that drops the oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> ReplayBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1 << 16)),
            capacity,
        }
    }

    /// Appends an item, discarding the oldest one if full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Draws `batch_size` distinct items uniformly at random.
    ///
    /// If the buffer holds `batch_size` items or fewer, all of them are
    /// returned in insertion order.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&T> {
        if self.items.len() <= batch_size {
            return self.items.iter().collect();
        }
        sample(rng, self.items.len(), batch_size)
            .into_iter()
            .map(|i| &self.items[i])
            .collect()
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

    /// Items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
