//! DQN agent augmented with equivalence-based auxiliary targets.
//!
//! Besides the usual TD regression on a replayed minibatch, every sampled
//! transition lends its TD target to the transitions the abstraction model
//! considers equivalent. Those borrowed targets form a second, weighted
//! regression term that is optimized jointly with the primary loss.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{nn, nn::OptimizerConfig, Device, Reduction, Tensor};
use tracing::debug;

use super::abstraction::{AbstractionLosses, AbstractionTrainer};
use super::buffer::ReplayBuffer;
use crate::algorithms::rl::cache::AbstractStateCache;
use crate::algorithms::rl::config::AgentConfig;
use crate::algorithms::rl::equivalence::{
    find_equivalences, retain_same_reward, BruteForceIndex, EquivalenceIndex,
};
use crate::algorithms::rl::exploration::EpsilonSchedule;
use crate::algorithms::rl::network::{states_tensor, with_seed, QNetwork};
use crate::algorithms::rl::types::{State, Transition};
use crate::algorithms::Agent;
use crate::error::{Error, Result};

/// Outcome of one learning iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DqnLosses {
    /// TD regression on the sampled minibatch.
    pub primary: f64,
    /// Weighted regression on equivalent pairs; `None` when no equivalent
    /// survived the lookup.
    pub auxiliary: Option<f64>,
    /// Number of auxiliary `(state, action)` pairs.
    pub n_equivalents: usize,
    /// Abstraction step run alongside, if its buffer had data.
    pub abstraction: Option<AbstractionLosses>,
}

/// Auxiliary supervised set collected in one iteration.
#[derive(Default)]
struct EquivalentTargets {
    states: Vec<State>,
    actions: Vec<i64>,
    targets: Vec<f32>,
}

impl EquivalentTargets {
    fn len(&self) -> usize {
        self.actions.len()
    }

    fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Q-value of the taken action per row: `[n, A]` and `[n]` to `[n]`.
fn gather_taken(q_values: &Tensor, actions: &Tensor) -> Tensor {
    let n = actions.size()[0];
    q_values.gather(1, &actions.view([n, 1]), false).squeeze_dim(1)
}

/// Deep Q-learning agent that also regresses equivalent transitions onto
/// borrowed TD targets.
///
/// Owns its Q and target networks, the abstraction trainer, both replay
/// buffers, the abstract-state cache and its RNG; nothing is shared with
/// other agents.
pub struct EquivalenceDqnAgent {
    config: AgentConfig,
    q_network: QNetwork,
    target_network: QNetwork,
    optimizer: nn::Optimizer,
    memory: ReplayBuffer<Transition>,
    abstraction: AbstractionTrainer,
    cache: AbstractStateCache,
    epsilon: EpsilonSchedule,
    rng: StdRng,
    iteration: u64,
    last_losses: Option<DqnLosses>,
}

impl EquivalenceDqnAgent {
    /// Builds an agent whose every random source derives from `seed`.
    ///
    /// The configuration is validated first. Network weights are drawn under
    /// [`with_seed`], so agents built concurrently with the same seed start
    /// identical. The target network starts as an exact copy of the
    /// Q-network.
    pub fn new(config: &AgentConfig, seed: u64, device: Device) -> Result<Self> {
        config.validate()?;
        let (q_network, mut target_network, abstraction) = with_seed(seed, || {
            Ok::<_, Error>((
                QNetwork::new(config, device),
                QNetwork::new(config, device),
                AbstractionTrainer::new(config, device)?,
            ))
        })?;
        target_network.copy_from(&q_network)?;
        let optimizer = nn::Adam {
            wd: config.weight_decay,
            ..Default::default()
        }
        .build(q_network.var_store(), config.learning_rate)?;

        Ok(Self {
            config: config.clone(),
            q_network,
            target_network,
            optimizer,
            memory: ReplayBuffer::new(config.memory_size),
            abstraction,
            cache: AbstractStateCache::new(
                config.cache_capacity,
                config.reward_quantizer(),
                config.state_quantizer(),
            ),
            epsilon: EpsilonSchedule::new(
                config.epsilon,
                config.epsilon_decay,
                config.epsilon_minimum,
            ),
            rng: StdRng::seed_from_u64(seed),
            iteration: 0,
            last_losses: None,
        })
    }

    /// Configuration the agent was built with.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon.value()
    }

    /// Completed learning iterations.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Replay buffer of raw transitions.
    pub fn memory(&self) -> &ReplayBuffer<Transition> {
        &self.memory
    }

    /// Abstraction trainer, including its own transition buffer.
    pub fn abstraction(&self) -> &AbstractionTrainer {
        &self.abstraction
    }

    /// Abstract-state cache used for equivalence lookups.
    pub fn cache(&self) -> &AbstractStateCache {
        &self.cache
    }

    /// Network being trained.
    pub fn q_network(&self) -> &QNetwork {
        &self.q_network
    }

    /// Frozen copy used for TD targets.
    pub fn target_network(&self) -> &QNetwork {
        &self.target_network
    }

    /// Losses of the most recent [`Agent::replay_mem`] that learned.
    pub fn last_losses(&self) -> Option<&DqnLosses> {
        self.last_losses.as_ref()
    }

    /// One learning iteration. Returns `None` while the replay buffer is
    /// empty.
    pub fn learn(&mut self) -> Result<Option<DqnLosses>> {
        if self.memory.is_empty() {
            return Ok(None);
        }
        let abstraction = self.abstraction.train_step(&mut self.cache, &mut self.rng)?;

        let batch: Vec<Transition> = self
            .memory
            .sample(self.config.batch_size, &mut self.rng)
            .into_iter()
            .cloned()
            .collect();
        let device = self.q_network.var_store().device();
        let state_dim = self.config.state_size;

        let states: Vec<&State> = batch.iter().map(|t| &t.state).collect();
        let next_states: Vec<&State> = batch.iter().map(|t| &t.next_state).collect();
        let states_t = states_tensor(&states, state_dim, device)?;
        let next_states_t = states_tensor(&next_states, state_dim, device)?;
        let actions: Vec<i64> = batch.iter().map(|t| t.action as i64).collect();
        let actions_t = Tensor::from_slice(&actions).to(device);
        let rewards: Vec<f32> = batch.iter().map(|t| t.reward as f32).collect();
        let rewards_t = Tensor::from_slice(&rewards).to(device);

        let targets = tch::no_grad(|| {
            let next_q = self.target_network.forward(&next_states_t).max_dim(1, false).0;
            &rewards_t + next_q * self.config.gamma
        });
        let target_values = Vec::<f32>::try_from(&targets.to(Device::Cpu))?;

        let q_taken = gather_taken(&self.q_network.forward(&states_t), &actions_t);
        let primary = q_taken.mse_loss(&targets, Reduction::Mean);

        let equivalents = self.collect_equivalents(&batch, &target_values)?;
        let auxiliary = if equivalents.is_empty() {
            None
        } else {
            let refs: Vec<&State> = equivalents.states.iter().collect();
            let aux_states_t = states_tensor(&refs, state_dim, device)?;
            let aux_actions_t = Tensor::from_slice(&equivalents.actions).to(device);
            let aux_targets_t = Tensor::from_slice(&equivalents.targets).to(device);
            let aux_q = gather_taken(&self.q_network.forward(&aux_states_t), &aux_actions_t);
            Some(aux_q.mse_loss(&aux_targets_t, Reduction::Mean) * self.config.equivalence_weight)
        };

        let loss = match &auxiliary {
            Some(aux) => &primary + aux,
            None => primary.shallow_clone(),
        };
        self.optimizer.backward_step(&loss);

        self.epsilon.step();
        self.iteration += 1;
        if self.iteration % self.config.target_sync_interval == 0 {
            self.target_network.copy_from(&self.q_network)?;
            debug!(iteration = self.iteration, "target network synced");
        }

        let losses = DqnLosses {
            primary: primary.double_value(&[]),
            auxiliary: auxiliary.map(|a| a.double_value(&[])),
            n_equivalents: equivalents.len(),
            abstraction,
        };
        debug!(
            iteration = self.iteration,
            primary = losses.primary,
            auxiliary = ?losses.auxiliary,
            equivalents = losses.n_equivalents,
            epsilon = self.epsilon.value(),
            "dqn step"
        );
        Ok(Some(losses))
    }

    /// Pairs every equivalent of every sampled transition with that
    /// sample's TD target.
    ///
    /// The index is built once over the cache as it stands; samples that
    /// fell out of the cache are re-inserted before their lookup.
    fn collect_equivalents(
        &mut self,
        batch: &[Transition],
        targets: &[f32],
    ) -> Result<EquivalentTargets> {
        let index = BruteForceIndex::build(self.cache.snapshot());
        let mut out = EquivalentTargets::default();
        for (t, &target) in batch.iter().zip(targets) {
            let key = self.cache.key(&t.state, t.action, t.reward);
            if !self.cache.contains(&key) {
                self.cache.put(
                    &t.state,
                    t.action,
                    t.reward,
                    &t.next_state,
                    self.abstraction.encoder(),
                )?;
            }

            let mut found = find_equivalences(&self.cache, &index, &key, self.config.k_neighbors)?;
            if self.config.reward_filter {
                found = retain_same_reward(found, key.reward());
            }
            for equivalent in found {
                out.states.push(equivalent.state().clone());
                out.actions.push(equivalent.action() as i64);
                out.targets.push(target);
            }
        }
        Ok(out)
    }
}

impl Agent for EquivalenceDqnAgent {
    fn on_episode_start(&mut self, _episode_index: usize) -> Result<()> {
        self.cache.refresh_all(self.abstraction.encoder())
    }

    fn select_action_index(&mut self, state: &State, explore: bool) -> Result<usize> {
        if explore && self.epsilon.explore(&mut self.rng) {
            return Ok(self.rng.gen_range(0..self.q_network.num_actions()));
        }
        self.q_network.greedy_action(state)
    }

    fn on_new_sample(&mut self, transition: Transition) -> Result<()> {
        self.abstraction.observe(&transition, &mut self.rng);
        self.cache.put(
            &transition.state,
            transition.action,
            transition.reward,
            &transition.next_state,
            self.abstraction.encoder(),
        )?;
        self.memory.push(transition);
        Ok(())
    }

    fn replay_mem(&mut self) -> Result<()> {
        if let Some(losses) = self.learn()? {
            self.last_losses = Some(losses);
        }
        Ok(())
    }
}
