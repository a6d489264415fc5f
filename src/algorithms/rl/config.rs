//! Configuration for the agent, the experiment loop and hyperparameter sweeps.
//!
//! All structs are plain data, built once per run and handed to constructors
//! by reference. Every field has a default so partial TOML/JSON files work.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::types::{ActionSpace, RewardQuantizer, StateQuantizer};
use crate::error::{Error, Result};

/// Hyperparameters of the equivalence-augmented DQN agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    // --- Q-learning ---
    /// Adam learning rate of the Q-network.
    pub learning_rate: f64,
    /// Adam weight decay of the Q-network.
    pub weight_decay: f64,
    /// Discount factor γ.
    pub gamma: f64,
    /// Capacity of the raw replay buffer.
    pub memory_size: usize,
    /// Minibatch size for Q-learning.
    pub batch_size: usize,
    /// Initial exploration rate ε.
    pub epsilon: f64,
    /// Multiplicative ε decay per learning iteration.
    pub epsilon_decay: f64,
    /// Lower bound on ε.
    pub epsilon_minimum: f64,
    /// Hard-sync the target network every this many learning iterations.
    pub target_sync_interval: u64,
    /// Width of the first Q-network hidden layer.
    pub first_layer_size: usize,
    /// Width of the second Q-network hidden layer.
    pub second_layer_size: usize,

    // --- State and action space ---
    /// Number of state components.
    pub state_size: usize,
    /// Discretization of the two control dimensions.
    pub action_space: ActionSpace,

    // --- Abstraction ---
    /// Capacity of the abstraction replay buffer.
    pub abstraction_memory_size: usize,
    /// Minibatch size for abstraction training.
    pub abstraction_batch_size: usize,
    /// Adam learning rate of the encoders.
    pub abstraction_learning_rate: f64,
    /// Dimension of the abstract embedding space.
    pub abstract_dim: usize,
    /// Hidden layer widths of the state encoder.
    pub state_encoder_hidden: [usize; 2],
    /// Hidden layer widths of the action encoder.
    pub action_encoder_hidden: [usize; 2],

    // --- Equivalence ---
    /// Maximum number of entries in the abstract-state cache.
    pub cache_capacity: usize,
    /// Number of equivalent neighbours retrieved per sample (K).
    pub k_neighbors: usize,
    /// Weight of the auxiliary equivalence loss.
    pub equivalence_weight: f64,
    /// Drop equivalent keys whose reward bucket differs from the query's.
    pub reward_filter: bool,
    /// Granularity of reward quantization.
    pub reward_granularity: f64,
    /// Decimal digits of state components kept in cache keys.
    pub state_key_decimals: u32,
}

impl AgentConfig {
    /// Size of the discrete action space, `bins²`.
    pub fn num_actions(&self) -> usize {
        self.action_space.num_actions()
    }

    /// Reward bucketing used by the cache and the reward anchors.
    pub fn reward_quantizer(&self) -> RewardQuantizer {
        RewardQuantizer::new(self.reward_granularity)
    }

    /// State rounding used for cache-key equality.
    pub fn state_quantizer(&self) -> StateQuantizer {
        StateQuantizer::new(self.state_key_decimals)
    }

    /// Equivalence settings of this configuration as a sweep point.
    pub fn variant(&self) -> SweepVariant {
        SweepVariant {
            k_neighbors: self.k_neighbors,
            equivalence_weight: self.equivalence_weight,
            reward_filter: self.reward_filter,
        }
    }

    /// Result subdirectory name, in the same format sweeps use.
    pub fn result_label(&self) -> String {
        self.variant().label(self.action_space.bins)
    }

    /// Rejects configurations that would fail or misbehave mid-run.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        }
        fn nonzero(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                Err(Error::InvalidConfig(format!("{name} must be at least 1")))
            } else {
                Ok(())
            }
        }

        positive("learning_rate", self.learning_rate)?;
        positive("abstraction_learning_rate", self.abstraction_learning_rate)?;
        positive("reward_granularity", self.reward_granularity)?;
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(Error::InvalidConfig(format!(
                "gamma must lie in [0, 1], got {}",
                self.gamma
            )));
        }
        if self.weight_decay < 0.0 || !self.weight_decay.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon_minimum)
            || !(self.epsilon_minimum..=1.0).contains(&self.epsilon)
        {
            return Err(Error::InvalidConfig(format!(
                "expected 0 <= epsilon_minimum <= epsilon <= 1, got {} and {}",
                self.epsilon_minimum, self.epsilon
            )));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon_decay must lie in (0, 1], got {}",
                self.epsilon_decay
            )));
        }
        if self.equivalence_weight < 0.0 || !self.equivalence_weight.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "equivalence_weight must be non-negative, got {}",
                self.equivalence_weight
            )));
        }
        if self.target_sync_interval == 0 {
            return Err(Error::InvalidConfig(
                "target_sync_interval must be at least 1".to_string(),
            ));
        }
        if self.action_space.bins < 2 {
            return Err(Error::InvalidConfig(format!(
                "action_space.bins must be at least 2, got {}",
                self.action_space.bins
            )));
        }
        if !(self.action_space.low < self.action_space.high) {
            return Err(Error::InvalidConfig(format!(
                "action_space.low ({}) must be below action_space.high ({})",
                self.action_space.low, self.action_space.high
            )));
        }
        if self.state_key_decimals > 12 {
            return Err(Error::InvalidConfig(format!(
                "state_key_decimals must be at most 12, got {}",
                self.state_key_decimals
            )));
        }

        nonzero("memory_size", self.memory_size)?;
        nonzero("batch_size", self.batch_size)?;
        nonzero("abstraction_memory_size", self.abstraction_memory_size)?;
        nonzero("abstraction_batch_size", self.abstraction_batch_size)?;
        nonzero("abstract_dim", self.abstract_dim)?;
        nonzero("cache_capacity", self.cache_capacity)?;
        nonzero("k_neighbors", self.k_neighbors)?;
        nonzero("state_size", self.state_size)?;
        nonzero("first_layer_size", self.first_layer_size)?;
        nonzero("second_layer_size", self.second_layer_size)?;
        for width in self
            .state_encoder_hidden
            .iter()
            .chain(self.action_encoder_hidden.iter())
        {
            nonzero("encoder hidden width", *width)?;
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let memory_size = 10_000;
        Self {
            learning_rate: 0.001,
            weight_decay: 0.0,
            gamma: 0.9,
            memory_size,
            batch_size: 16,
            epsilon: 1.0,
            epsilon_decay: 0.995,
            epsilon_minimum: 0.1,
            target_sync_interval: 10,
            first_layer_size: 256,
            second_layer_size: 256,
            state_size: 3,
            action_space: ActionSpace::default(),
            abstraction_memory_size: memory_size,
            abstraction_batch_size: 32,
            abstraction_learning_rate: 0.001,
            abstract_dim: 20,
            state_encoder_hidden: [256, 256],
            action_encoder_hidden: [128, 128],
            cache_capacity: memory_size,
            k_neighbors: 11,
            equivalence_weight: 1.0,
            reward_filter: true,
            reward_granularity: 0.5,
            state_key_decimals: 6,
        }
    }
}

/// Outer experiment loop: how many runs, episodes and steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Independent training runs per configuration.
    pub runs: usize,
    /// Episodes per run.
    pub episodes: usize,
    /// Environment steps per episode.
    pub episode_length: usize,
    /// Simulated seconds per environment step.
    pub t_interval: f64,
    /// Added to the next free result index to obtain a run's seed.
    pub seed_offset: u64,
    /// Directory receiving one CSV file per run.
    pub results_dir: PathBuf,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 || self.episodes == 0 || self.episode_length == 0 {
            return Err(Error::InvalidConfig(format!(
                "runs, episodes and episode_length must be at least 1, got {}, {}, {}",
                self.runs, self.episodes, self.episode_length
            )));
        }
        if !(self.t_interval.is_finite() && self.t_interval >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "t_interval must be non-negative, got {}",
                self.t_interval
            )));
        }
        Ok(())
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            runs: 100,
            episodes: 200,
            episode_length: 20,
            t_interval: 1.0,
            seed_offset: 5,
            results_dir: PathBuf::from("result"),
        }
    }
}

/// One point of a hyperparameter sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepVariant {
    pub k_neighbors: usize,
    pub equivalence_weight: f64,
    pub reward_filter: bool,
}

impl SweepVariant {
    /// Returns a copy of `base` with this variant's overrides applied.
    pub fn apply(&self, base: &AgentConfig) -> AgentConfig {
        AgentConfig {
            k_neighbors: self.k_neighbors,
            equivalence_weight: self.equivalence_weight,
            reward_filter: self.reward_filter,
            ..base.clone()
        }
    }

    /// Result subdirectory name for this variant.
    pub fn label(&self, action_bins: usize) -> String {
        format!(
            "{}_equivalent({})-{},filter({})",
            action_bins, self.k_neighbors, self.equivalence_weight, self.reward_filter
        )
    }
}

/// Sweep grid over neighbour count, loss weight and reward filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub variants: Vec<SweepVariant>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let mut variants = Vec::new();
        for k in [3, 7, 11] {
            for (reward_filter, equivalence_weight) in [(false, 0.6), (true, 1.0)] {
                variants.push(SweepVariant {
                    k_neighbors: k,
                    equivalence_weight,
                    reward_filter,
                });
            }
        }
        Self { variants }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub experiment: ExperimentConfig,
    pub sweep: SweepConfig,
}

impl Config {
    /// Loads and validates a configuration file (`.json` or TOML).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text)?,
            _ => Self::from_toml_str(&text)?,
        };
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.experiment.validate()?;
        for variant in &self.sweep.variants {
            variant.apply(&self.agent).validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.agent.num_actions(), 81);
        assert_eq!(cfg.agent.cache_capacity, cfg.agent.memory_size);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [agent]
            k_neighbors = 3
            reward_filter = false

            [experiment]
            runs = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.k_neighbors, 3);
        assert!(!cfg.agent.reward_filter);
        assert_eq!(cfg.agent.gamma, 0.9);
        assert_eq!(cfg.experiment.runs, 2);
        assert_eq!(cfg.experiment.episodes, 200);
    }

    #[test]
    fn json_round_trip() {
        let cfg = Config::default();
        let text = serde_json::to_string(&cfg).unwrap();
        assert_eq!(Config::from_json_str(&text).unwrap(), cfg);
    }

    #[test]
    fn invalid_values_fail_fast() {
        let err = Config::from_toml_str("[agent]\ncache_capacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Config::from_toml_str("[agent]\ngamma = 1.5\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Config::from_toml_str("[agent]\nepsilon = 0.05\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml_str("[agent]\nk_neighbors = \"many\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn sweep_defaults_cover_grid() {
        let sweep = SweepConfig::default();
        assert_eq!(sweep.variants.len(), 6);
        let label = sweep.variants[1].label(9);
        assert_eq!(label, "9_equivalent(3)-1,filter(true)");
        let applied = sweep.variants[0].apply(&AgentConfig::default());
        assert_eq!(applied.k_neighbors, 3);
        assert_eq!(applied.equivalence_weight, 0.6);
        assert!(!applied.reward_filter);
    }

    #[test]
    fn result_label_describes_equivalence_settings() {
        let agent = AgentConfig::default();
        assert_eq!(agent.result_label(), "9_equivalent(11)-1,filter(true)");

        let sweep = SweepConfig::default();
        for variant in &sweep.variants {
            let applied = variant.apply(&agent);
            assert_eq!(applied.variant(), *variant);
            assert_eq!(applied.result_label(), variant.label(9));
        }
    }
}
