//! Core value types shared by the agent, the cache and the environment.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw environment state: the configuration angles `(theta, phi, psi)`.
pub type State = Vec<f64>;

/// Point in the abstract embedding space.
pub type Embedding = Vec<f32>;

/// One observed environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: State,
    pub action: usize,
    pub reward: f64,
    pub next_state: State,
}

impl Transition {
    pub fn new(state: State, action: usize, reward: f64, next_state: State) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
        }
    }
}

/// Two-dimensional discretized control space.
///
/// An action index `i` in `[0, bins²)` selects the bin pair
/// `(i / bins, i % bins)`, each mapped linearly onto `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionSpace {
    /// Number of bins per control dimension.
    pub bins: usize,
    /// Control value of bin 0.
    pub low: f64,
    /// Control value of the last bin.
    pub high: f64,
}

impl ActionSpace {
    pub fn new(bins: usize, low: f64, high: f64) -> Self {
        Self { bins, low, high }
    }

    /// Total number of discrete actions.
    pub fn num_actions(&self) -> usize {
        self.bins * self.bins
    }

    fn bin_width(&self) -> f64 {
        (self.high - self.low) / (self.bins as f64 - 1.0)
    }

    /// Control value of a single bin.
    pub fn bin_value(&self, bin: usize) -> f64 {
        bin as f64 * self.bin_width() + self.low
    }

    /// Decodes an action index into `(phidot, psidot)`.
    pub fn decode(&self, index: usize) -> Result<(f64, f64)> {
        if index >= self.num_actions() {
            return Err(Error::InvalidAction {
                index,
                num_actions: self.num_actions(),
            });
        }
        Ok((
            self.bin_value(index / self.bins),
            self.bin_value(index % self.bins),
        ))
    }

    /// Maps control values back to the index of the nearest bin pair.
    ///
    /// Values outside `[low, high]` are clamped to the edge bins.
    pub fn encode(&self, phidot: f64, psidot: f64) -> usize {
        self.nearest_bin(phidot) * self.bins + self.nearest_bin(psidot)
    }

    fn nearest_bin(&self, value: f64) -> usize {
        let raw = ((value - self.low) / self.bin_width()).round();
        raw.clamp(0.0, (self.bins - 1) as f64) as usize
    }
}

impl Default for ActionSpace {
    fn default() -> Self {
        Self::new(9, -1.0, 1.0)
    }
}

/// Integer bucket of a quantized reward. Hashes exactly, unlike `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RewardBucket(pub i64);

impl fmt::Display for RewardBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rounds rewards to a fixed granularity.
///
/// Rounding is half-to-even, so `quantize` is idempotent and every reward
/// in one bucket maps to the same representative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardQuantizer {
    granularity: f64,
}

impl RewardQuantizer {
    pub fn new(granularity: f64) -> Self {
        Self { granularity }
    }

    pub fn granularity(&self) -> f64 {
        self.granularity
    }

    pub fn bucket(&self, reward: f64) -> RewardBucket {
        RewardBucket((reward / self.granularity).round_ties_even() as i64)
    }

    /// Representative reward of a bucket.
    pub fn value(&self, bucket: RewardBucket) -> f64 {
        bucket.0 as f64 * self.granularity
    }

    pub fn quantize(&self, reward: f64) -> f64 {
        self.value(self.bucket(reward))
    }
}

/// Fixed-precision view of a state, used for hashing cache keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateQuantizer {
    scale: f64,
}

impl StateQuantizer {
    /// Keeps `decimals` digits after the decimal point.
    pub fn new(decimals: u32) -> Self {
        Self {
            scale: 10f64.powi(decimals as i32),
        }
    }

    pub fn cells(&self, state: &[f64]) -> Vec<i64> {
        state.iter().map(|&x| (x * self.scale).round() as i64).collect()
    }
}

/// Key of the abstract-state cache: `(state, action, reward bucket)`.
///
/// Equality and hashing go through the quantized state cells, never the raw
/// floats. The raw state is kept so equivalent keys can be fed back into the
/// Q-network.
#[derive(Debug, Clone)]
pub struct CacheKey {
    state: State,
    cells: Vec<i64>,
    action: usize,
    reward: RewardBucket,
}

impl CacheKey {
    pub fn new(state: State, quantizer: &StateQuantizer, action: usize, reward: RewardBucket) -> Self {
        let cells = quantizer.cells(&state);
        Self {
            state,
            cells,
            action,
            reward,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn action(&self) -> usize {
        self.action
    }

    pub fn reward(&self) -> RewardBucket {
        self.reward
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells && self.action == other.action && self.reward == other.reward
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cells.hash(state);
        self.action.hash(state);
        self.reward.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {}, {})", self.state, self.action, self.reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn decode_center_action() {
        let space = ActionSpace::new(9, -1.0, 1.0);
        let (phidot, psidot) = space.decode(40).unwrap();
        assert!(phidot.abs() < 1e-12);
        assert!(psidot.abs() < 1e-12);
    }

    #[test]
    fn decode_corners() {
        let space = ActionSpace::default();
        assert_eq!(space.decode(0).unwrap(), (-1.0, -1.0));
        assert_eq!(space.decode(8).unwrap(), (-1.0, 1.0));
        assert_eq!(space.decode(80).unwrap(), (1.0, 1.0));
    }

    #[test]
    fn decode_rejects_out_of_range() {
        let space = ActionSpace::default();
        assert!(matches!(
            space.decode(81),
            Err(Error::InvalidAction {
                index: 81,
                num_actions: 81
            })
        ));
    }

    #[test]
    fn encode_inverts_decode() {
        let space = ActionSpace::default();
        for index in 0..space.num_actions() {
            let (phidot, psidot) = space.decode(index).unwrap();
            assert_eq!(space.encode(phidot, psidot), index);
        }
    }

    #[test]
    fn encode_snaps_to_nearest_bin() {
        let space = ActionSpace::default();
        // 0.1 is closer to bin 4 (0.0) than bin 5 (0.25).
        assert_eq!(space.encode(0.1, 0.2), 4 * 9 + 5);
        assert_eq!(space.encode(-3.0, 3.0), 8);
    }

    #[test]
    fn quantize_same_bucket() {
        let q = RewardQuantizer::new(0.5);
        assert_eq!(q.quantize(0.9), q.quantize(1.1));
        assert_eq!(q.quantize(0.9), 1.0);
        assert_eq!(q.bucket(0.9), q.bucket(1.1));
        assert_ne!(q.bucket(0.9), q.bucket(1.4));
    }

    #[test]
    fn quantize_is_idempotent() {
        let q = RewardQuantizer::new(0.5);
        for r in [-3.7, -0.26, 0.0, 0.24, 0.25, 0.75, 1.3, 2.0, 17.49] {
            let once = q.quantize(r);
            assert_eq!(q.quantize(once), once);
        }
    }

    #[test]
    fn quantize_other_granularity() {
        let q = RewardQuantizer::new(2.0);
        assert_eq!(q.quantize(2.9), 2.0);
        assert_eq!(q.quantize(3.1), 4.0);
        assert_eq!(q.quantize(q.quantize(3.1)), 4.0);
    }

    #[test]
    fn cache_key_ignores_sub_precision_noise() {
        let sq = StateQuantizer::new(6);
        let a = CacheKey::new(vec![0.1, 0.2, 0.3], &sq, 3, RewardBucket(2));
        let b = CacheKey::new(vec![0.1 + 1e-9, 0.2, 0.3 - 1e-9], &sq, 3, RewardBucket(2));
        let c = CacheKey::new(vec![0.1, 0.2, 0.3], &sq, 4, RewardBucket(2));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
