//! Online training of the abstraction model.
//!
//! Fits the encoders so that
//! - the embedding of the true next state matches the current embedding
//!   plus the predicted action displacement (transition loss),
//! - the displacement averaged over all actions stays small
//!   (equivalence loss),
//! - each state's embedding is pulled toward the anchor of its reward
//!   bucket (reward-fixation loss).

use std::collections::HashMap;

use rand::Rng;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};
use tracing::debug;

use super::buffer::ReplayBuffer;
use crate::algorithms::rl::cache::AbstractStateCache;
use crate::algorithms::rl::cache::StateEncoding;
use crate::algorithms::rl::config::AgentConfig;
use crate::algorithms::rl::network::{tensor_rows, AbstractionModel};
use crate::algorithms::rl::types::{RewardBucket, RewardQuantizer, State, Transition};
use crate::error::Result;

/// Loss components of one abstraction step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbstractionLosses {
    /// Distance between the encoded next state and the predicted one.
    pub transition: f64,
    /// Size of the displacement averaged over all actions.
    pub equivalence: f64,
    /// Distance between embeddings and their reward anchors.
    pub reward_fixation: f64,
}

impl AbstractionLosses {
    /// Sum of the three components, the quantity that was minimized.
    pub fn total(&self) -> f64 {
        self.transition + self.equivalence + self.reward_fixation
    }
}

/// Squared Euclidean distance along dim 1, averaged over the batch.
fn mean_square_dist(a: &Tensor, b: &Tensor) -> Tensor {
    (a - b)
        .pow_tensor_scalar(2)
        .sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
        .mean(Kind::Float)
}

/// Owns the abstraction model, its optimizer, its replay buffer and the
/// per-reward anchors.
pub struct AbstractionTrainer {
    model: AbstractionModel,
    optimizer: nn::Optimizer,
    memory: ReplayBuffer<Transition>,
    batch_size: usize,
    abstract_dim: usize,
    rewards: RewardQuantizer,
    reward_fixations: HashMap<RewardBucket, Vec<f32>>,
}

impl AbstractionTrainer {
    /// Creates a trainer with fresh encoders and an empty buffer.
    ///
    /// Weights come from the global torch generator; seed it through
    /// [`with_seed`](crate::algorithms::rl::network::with_seed) for
    /// reproducible runs.
    pub fn new(config: &AgentConfig, device: Device) -> Result<Self> {
        let model = AbstractionModel::new(config, device);
        let optimizer =
            nn::Adam::default().build(model.var_store(), config.abstraction_learning_rate)?;
        Ok(Self {
            model,
            optimizer,
            memory: ReplayBuffer::new(config.abstraction_memory_size),
            batch_size: config.abstraction_batch_size,
            abstract_dim: config.abstract_dim,
            rewards: config.reward_quantizer(),
            reward_fixations: HashMap::new(),
        })
    }

    pub fn model(&self) -> &AbstractionModel {
        &self.model
    }

    /// The current state encoder, for filling and refreshing the cache.
    pub fn encoder(&self) -> &dyn StateEncoding {
        &self.model
    }

    /// Transitions available for abstraction training.
    pub fn memory(&self) -> &ReplayBuffer<Transition> {
        &self.memory
    }

    /// Anchor of a reward bucket, if one has been drawn.
    pub fn reward_fixation(&self, bucket: RewardBucket) -> Option<&[f32]> {
        self.reward_fixations.get(&bucket).map(Vec::as_slice)
    }

    /// Number of reward buckets seen so far.
    pub fn n_reward_fixations(&self) -> usize {
        self.reward_fixations.len()
    }

    /// Stores a transition and draws its reward anchor on first sight.
    ///
    /// Anchors are uniform in `[0, 1)^abstract_dim` and never redrawn.
    pub fn observe<R: Rng + ?Sized>(&mut self, transition: &Transition, rng: &mut R) {
        let bucket = self.rewards.bucket(transition.reward);
        let dim = self.abstract_dim;
        self.reward_fixations
            .entry(bucket)
            .or_insert_with(|| (0..dim).map(|_| rng.gen::<f32>()).collect());
        self.memory.push(transition.clone());
    }

    /// One gradient step on a minibatch of the abstraction buffer.
    ///
    /// Afterwards the sampled next states are re-encoded with the updated
    /// encoder and written into `cache`. Returns `None` if the buffer is
    /// empty.
    pub fn train_step<R: Rng + ?Sized>(
        &mut self,
        cache: &mut AbstractStateCache,
        rng: &mut R,
    ) -> Result<Option<AbstractionLosses>> {
        if self.memory.is_empty() {
            return Ok(None);
        }
        let batch: Vec<Transition> = self
            .memory
            .sample(self.batch_size, rng)
            .into_iter()
            .cloned()
            .collect();
        let n = batch.len() as i64;

        let states: Vec<&State> = batch.iter().map(|t| &t.state).collect();
        let next_states: Vec<&State> = batch.iter().map(|t| &t.next_state).collect();
        let actions: Vec<i64> = batch.iter().map(|t| t.action as i64).collect();
        let mut fixations = Vec::with_capacity(batch.len() * self.abstract_dim);
        for t in &batch {
            let bucket = self.rewards.bucket(t.reward);
            let dim = self.abstract_dim;
            let anchor = self
                .reward_fixations
                .entry(bucket)
                .or_insert_with(|| (0..dim).map(|_| rng.gen::<f32>()).collect());
            fixations.extend_from_slice(anchor);
        }

        let device = self.model.var_store().device();
        let states_t = self.model.states_tensor(&states)?;
        let next_states_t = self.model.states_tensor(&next_states)?;
        let fixations_t = Tensor::from_slice(&fixations)
            .view([n, self.abstract_dim as i64])
            .to(device);
        let actions_t = Tensor::from_slice(&actions).to(device);

        let z = self.model.state_encoder().forward(&states_t);
        let displacements = self
            .model
            .action_encoder()
            .forward(&z, &self.model.action_onehots());
        let dim = self.abstract_dim as i64;
        let taken = displacements
            .gather(
                1,
                &actions_t.view([n, 1, 1]).expand([n, 1, dim], false),
                false,
            )
            .squeeze_dim(1);
        let transitioned = &z + taken;
        let z_next = self.model.state_encoder().forward(&next_states_t);

        let transition_loss = mean_square_dist(&z_next, &transitioned);
        let mean_displacement = displacements.mean_dim([1i64].as_slice(), false, Kind::Float);
        let equivalence_loss = mean_square_dist(&z, &(&z + mean_displacement));
        let fixation_loss = mean_square_dist(&z, &fixations_t);

        let loss = &transition_loss + &equivalence_loss + &fixation_loss;
        self.optimizer.backward_step(&loss);

        let losses = AbstractionLosses {
            transition: transition_loss.double_value(&[]),
            equivalence: equivalence_loss.double_value(&[]),
            reward_fixation: fixation_loss.double_value(&[]),
        };
        debug!(
            transition = losses.transition,
            equivalence = losses.equivalence,
            reward_fixation = losses.reward_fixation,
            batch = n,
            "abstraction step"
        );

        let refreshed = tch::no_grad(|| self.model.state_encoder().forward(&next_states_t));
        for (t, embedding) in batch.iter().zip(tensor_rows(&refreshed)?) {
            let key = cache.key(&t.state, t.action, t.reward);
            cache.overwrite(key, embedding, &t.next_state);
        }
        Ok(Some(losses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::network::with_seed;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> AgentConfig {
        AgentConfig {
            abstract_dim: 4,
            state_encoder_hidden: [16, 16],
            action_encoder_hidden: [8, 8],
            action_space: crate::algorithms::rl::types::ActionSpace::new(3, -1.0, 1.0),
            abstraction_batch_size: 4,
            ..AgentConfig::default()
        }
    }

    fn make_cache(config: &AgentConfig) -> AbstractStateCache {
        AbstractStateCache::new(
            config.cache_capacity,
            config.reward_quantizer(),
            config.state_quantizer(),
        )
    }

    #[test]
    fn observe_draws_one_anchor_per_bucket() {
        let config = small_config();
        let mut trainer = with_seed(0, || AbstractionTrainer::new(&config, Device::Cpu)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let s = vec![0.0, 0.0, 0.0];
        trainer.observe(&Transition::new(s.clone(), 0, 0.9, s.clone()), &mut rng);
        let anchor = trainer.reward_fixation(RewardBucket(2)).unwrap().to_vec();
        trainer.observe(&Transition::new(s.clone(), 1, 1.1, s.clone()), &mut rng);
        trainer.observe(&Transition::new(s.clone(), 1, -3.0, s.clone()), &mut rng);

        assert_eq!(trainer.n_reward_fixations(), 2);
        assert_eq!(trainer.reward_fixation(RewardBucket(2)).unwrap(), anchor.as_slice());
        assert!(anchor.iter().all(|&v| (0.0..1.0).contains(&v)));
        assert_eq!(trainer.memory().len(), 3);
    }

    #[test]
    fn empty_buffer_skips_step() {
        let config = small_config();
        let mut trainer = with_seed(3, || AbstractionTrainer::new(&config, Device::Cpu)).unwrap();
        let mut cache = make_cache(&config);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(trainer.train_step(&mut cache, &mut rng).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn train_step_reports_finite_losses_and_fills_cache() {
        let config = small_config();
        let mut trainer = with_seed(1, || AbstractionTrainer::new(&config, Device::Cpu)).unwrap();
        let mut cache = make_cache(&config);
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..6 {
            let s = vec![i as f64 * 0.1, 0.0, -0.1];
            let n = vec![i as f64 * 0.1 + 0.05, 0.1, -0.1];
            trainer.observe(&Transition::new(s, i % 9, i as f64 * 0.5, n), &mut rng);
        }

        let losses = trainer.train_step(&mut cache, &mut rng).unwrap().unwrap();
        assert!(losses.transition.is_finite());
        assert!(losses.equivalence.is_finite());
        assert!(losses.reward_fixation.is_finite());
        assert!(losses.total() >= 0.0);
        // only the sampled transitions were written
        assert_eq!(cache.len(), 4);
        for (_, entry) in cache.iter() {
            assert_eq!(entry.embedding.len(), 4);
        }
    }

    #[test]
    fn train_step_keeps_cached_next_state() {
        let config = small_config();
        let mut trainer = with_seed(2, || AbstractionTrainer::new(&config, Device::Cpu)).unwrap();
        let mut cache = make_cache(&config);
        let mut rng = StdRng::seed_from_u64(2);
        let s = vec![0.2, 0.1, 0.0];
        let n = vec![0.3, 0.1, 0.0];
        let t = Transition::new(s.clone(), 2, 1.0, n.clone());
        trainer.observe(&t, &mut rng);
        let (key, _) = cache.put(&s, 2, 1.0, &n, trainer.encoder()).unwrap();
        let before = cache.get(&key).unwrap().clone();

        trainer.train_step(&mut cache, &mut rng).unwrap();
        let after = cache.get(&key).unwrap();
        assert_eq!(after.next_state, before.next_state);
        assert_ne!(after.embedding, before.embedding);
    }
}
