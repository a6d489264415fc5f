//! Bounded least-recently-used cache of abstract-state representatives.
//!
//! [`LruCache`] is a slab-backed doubly linked list indexed by a `HashMap`.
//! [`AbstractStateCache`] builds the equivalence lookup table on top of it.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::trace;

use super::types::{CacheKey, Embedding, RewardQuantizer, State, StateQuantizer};
use crate::error::{Error, Result};

/// Batched, gradient-free encoding of raw states into the abstract space.
pub trait StateEncoding {
    /// Returns one embedding per input state, in input order.
    fn encode_states(&self, states: &[&State]) -> Result<Vec<Embedding>>;
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity map evicting the least recently used entry.
///
/// Recency changes only on insertion and [`LruCache::touch`]; reads through
/// [`LruCache::get`] leave the order alone.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    /// Least recently used.
    head: Option<usize>,
    /// Most recently used.
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns `true` if `key` is stored. Does not change recency.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the value for `key` without changing recency.
    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|n| &n.value)
    }

    /// Mutable access to the value for `key` without changing recency.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_mut().map(|n| &mut n.value)
    }

    /// Marks `key` most recently used. Returns false if it is absent.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.index.get(key).copied() {
            Some(slot) => {
                self.unlink(slot);
                self.push_back(slot);
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces `key` as the most recently used entry.
    ///
    /// Returns the entries evicted to get back under capacity.
    pub fn put(&mut self, key: K, value: V) -> Vec<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.slots[slot].as_mut() {
                node.value = value;
            }
            self.unlink(slot);
            self.push_back(slot);
            return Vec::new();
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_back(slot);

        let mut evicted = Vec::new();
        while self.len() > self.capacity {
            match self.evict() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Removes and returns the least recently used entry.
    pub fn evict(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
        }
    }

    /// Mutable values from least to most recently used.
    pub fn for_each_value_mut<F: FnMut(&K, &mut V)>(&mut self, mut f: F) {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.slots[slot].as_mut() {
                Some(node) => {
                    f(&node.key, &mut node.value);
                    cursor = node.next;
                }
                None => break,
            }
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(|n| n.as_ref())
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.slots[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(n) = self.slots[t].as_mut() {
                    n.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

/// Iterator over an [`LruCache`] in recency order, oldest first.
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: Option<usize>,
}

impl<'a, K: Hash + Eq + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cache.node(self.cursor?)?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

/// Value stored for each cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Embedding of `next_state` under the encoder at the last refresh.
    pub embedding: Embedding,
    /// Raw successor state.
    pub next_state: State,
}

/// Equivalence lookup table mapping `(state, action, reward bucket)` to the
/// abstract embedding of the observed successor state.
#[derive(Debug)]
pub struct AbstractStateCache {
    entries: LruCache<CacheKey, CacheEntry>,
    rewards: RewardQuantizer,
    states: StateQuantizer,
}

impl AbstractStateCache {
    /// Creates an empty cache keyed through the given quantizers.
    pub fn new(capacity: usize, rewards: RewardQuantizer, states: StateQuantizer) -> Self {
        Self {
            entries: LruCache::new(capacity),
            rewards,
            states,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn reward_quantizer(&self) -> &RewardQuantizer {
        &self.rewards
    }

    /// Builds the key for a raw `(state, action, reward)` triple.
    pub fn key(&self, state: &State, action: usize, reward: f64) -> CacheKey {
        CacheKey::new(state.clone(), &self.states, action, self.rewards.bucket(reward))
    }

    /// Returns `true` if `key` is cached. Does not change recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Returns the entry for `key` without changing recency.
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Records an observed transition.
    ///
    /// A known key is only marked most recently used; its stored embedding
    /// is left alone until the next [`refresh_all`](Self::refresh_all). A
    /// new key is encoded and inserted, evicting the least recently used
    /// entry when over capacity. Returns the key and the evicted keys.
    pub fn put(
        &mut self,
        state: &State,
        action: usize,
        reward: f64,
        next_state: &State,
        encoder: &dyn StateEncoding,
    ) -> Result<(CacheKey, Vec<CacheKey>)> {
        let key = self.key(state, action, reward);
        if self.entries.touch(&key) {
            return Ok((key, Vec::new()));
        }

        let embedding = encoder
            .encode_states(&[next_state])?
            .pop()
            .ok_or(Error::EncoderMismatch {
                expected: 1,
                actual: 0,
            })?;
        let evicted = self.insert(key.clone(), embedding, next_state.clone());
        Ok((key, evicted))
    }

    /// Replaces the embedding stored for `key` without changing recency.
    ///
    /// A key that was evicted in the meantime is re-inserted as most
    /// recently used with `next_state`.
    pub fn overwrite(&mut self, key: CacheKey, embedding: Embedding, next_state: &State) -> Vec<CacheKey> {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.embedding = embedding;
            return Vec::new();
        }
        self.insert(key, embedding, next_state.clone())
    }

    /// Removes the least recently used entry.
    pub fn evict(&mut self) -> Option<(CacheKey, CacheEntry)> {
        self.entries.evict()
    }

    /// Re-encodes every cached successor state in one batch.
    pub fn refresh_all(&mut self, encoder: &dyn StateEncoding) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let next_states: Vec<&State> = self.entries.iter().map(|(_, e)| &e.next_state).collect();
        let embeddings = encoder.encode_states(&next_states)?;
        if embeddings.len() != next_states.len() {
            return Err(Error::EncoderMismatch {
                expected: next_states.len(),
                actual: embeddings.len(),
            });
        }

        let mut fresh = embeddings.into_iter();
        self.entries.for_each_value_mut(|_, entry| {
            if let Some(embedding) = fresh.next() {
                entry.embedding = embedding;
            }
        });
        Ok(())
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry)> {
        self.entries.iter()
    }

    /// Copies out `(key, embedding)` pairs for building an index.
    pub fn snapshot(&self) -> Vec<(CacheKey, Embedding)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.embedding.clone()))
            .collect()
    }

    fn insert(&mut self, key: CacheKey, embedding: Embedding, next_state: State) -> Vec<CacheKey> {
        let evicted: Vec<CacheKey> = self
            .entries
            .put(
                key,
                CacheEntry {
                    embedding,
                    next_state,
                },
            )
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for k in &evicted {
            trace!(key = %k, "evicted abstract state");
        }
        evicted
    }
}
