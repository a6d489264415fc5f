//! Equivalence-augmented reinforcement learning.
//!
//! Environment, cache, equivalence index, configuration and the episode
//! runner build without extra native dependencies. Neural networks, the
//! abstraction trainer and the DQN agent require the `nn` feature flag
//! (which brings in `tch`).

pub mod cache;
pub mod config;
pub mod environment;
pub mod equivalence;
pub mod exploration;
pub mod results;
pub mod training;
pub mod types;

#[cfg(feature = "nn")]
pub mod network;

pub use cache::{AbstractStateCache, CacheEntry, LruCache, StateEncoding};
pub use config::{AgentConfig, Config, ExperimentConfig, SweepConfig, SweepVariant};
pub use environment::{Environment, StepResult, WheelchairEnv, WheelchairParams};
pub use equivalence::{find_equivalences, retain_same_reward, BruteForceIndex, EquivalenceIndex};
pub use exploration::EpsilonSchedule;
pub use results::RunSummary;
pub use types::{
    ActionSpace, CacheKey, Embedding, RewardBucket, RewardQuantizer, State, StateQuantizer,
    Transition,
};

#[cfg(feature = "nn")]
pub use network::{AbstractionModel, ActionEncoder, QNetwork, StateEncoder};
#[cfg(feature = "nn")]
pub use training::{AbstractionTrainer, EquivalenceDqnAgent};
