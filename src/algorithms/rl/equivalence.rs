//! Nearest-neighbour lookup of behaviourally equivalent transitions.

use std::cmp::Ordering;

use super::cache::AbstractStateCache;
use super::types::{CacheKey, Embedding, RewardBucket};
use crate::error::{Error, Result};

/// A nearest-neighbour structure over abstract embeddings.
///
/// Indices are immutable snapshots: rebuild instead of updating when the
/// underlying cache changes.
pub trait EquivalenceIndex<K> {
    /// Builds the index over `(key, embedding)` pairs.
    fn build(entries: Vec<(K, Embedding)>) -> Self
    where
        Self: Sized;

    /// Number of indexed points.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` keys with their squared Euclidean distance to `point`,
    /// nearest first. Nothing is excluded.
    fn nearest(&self, point: &[f32], k: usize) -> Vec<(&K, f32)>;

    /// Up to `k` keys nearest to `point`, nearest first, skipping the first
    /// point lying exactly on `point`.
    fn query(&self, point: &[f32], k: usize) -> Vec<&K> {
        let ranked = self.nearest(point, k.saturating_add(1));
        let self_match = ranked.iter().position(|&(_, d)| d == 0.0);
        ranked
            .into_iter()
            .enumerate()
            .filter(|(rank, _)| Some(*rank) != self_match)
            .take(k)
            .map(|(_, (key, _))| key)
            .collect()
    }
}

/// Exact index scanning every point on each query.
///
/// Ties in distance keep build order.
#[derive(Debug, Clone)]
pub struct BruteForceIndex<K> {
    keys: Vec<K>,
    points: Vec<Embedding>,
}

impl<K> EquivalenceIndex<K> for BruteForceIndex<K> {
    fn build(entries: Vec<(K, Embedding)>) -> Self {
        let (keys, points) = entries.into_iter().unzip();
        Self { keys, points }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn nearest(&self, point: &[f32], k: usize) -> Vec<(&K, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, squared_distance(p, point)))
            .collect();
        // stable: equal distances stay in build order
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        ranked
            .into_iter()
            .take(k)
            .map(|(i, d)| (&self.keys[i], d))
            .collect()
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Looks up the keys equivalent to `key`.
///
/// `key` must already be cached; a miss means the caller broke the
/// insert-before-query invariant and is reported as [`Error::CacheMiss`].
/// Exactly `key` is excluded: other keys sharing its embedding are the
/// nearest equivalents and are kept.
pub fn find_equivalences<'a, I>(
    cache: &AbstractStateCache,
    index: &'a I,
    key: &CacheKey,
    k: usize,
) -> Result<Vec<&'a CacheKey>>
where
    I: EquivalenceIndex<CacheKey>,
{
    let entry = cache
        .get(key)
        .ok_or_else(|| Error::CacheMiss(key.to_string()))?;
    Ok(index
        .nearest(&entry.embedding, k.saturating_add(1))
        .into_iter()
        .map(|(candidate, _)| candidate)
        .filter(|candidate| *candidate != key)
        .take(k)
        .collect())
}

/// Keeps only the keys whose reward bucket equals `reward`.
pub fn retain_same_reward<'a>(keys: Vec<&'a CacheKey>, reward: RewardBucket) -> Vec<&'a CacheKey> {
    keys.into_iter().filter(|k| k.reward() == reward).collect()
}
