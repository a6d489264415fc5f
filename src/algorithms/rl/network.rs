//! Neural networks using tch-rs (PyTorch bindings).
//!
//! Provides the Q-network and the two encoders of the abstraction model.
//! This module is only available with the `nn` feature.

use std::sync::{Mutex, PoisonError};

use tch::{nn, nn::Module, Device, Kind, Tensor};

use super::cache::StateEncoding;
use super::config::AgentConfig;
use super::types::{Embedding, State};
use crate::error::{Error, Result};

/// Serializes every draw from the process-wide torch generator.
///
/// `tch::manual_seed` is global, so two agents initialised on different
/// threads would otherwise interleave their draws.
static TORCH_RNG: Mutex<()> = Mutex::new(());

/// Seeds the torch generator with `seed` and runs `f` while holding it.
///
/// Parameter initialisation inside `f` depends on `seed` alone, whatever
/// other threads are doing.
pub fn with_seed<T>(seed: u64, f: impl FnOnce() -> T) -> T {
    let _guard = TORCH_RNG.lock().unwrap_or_else(PoisonError::into_inner);
    tch::manual_seed(seed as i64);
    f()
}

/// Stacks states into a `[n, state_dim]` float tensor.
pub(crate) fn states_tensor(states: &[&State], state_dim: usize, device: Device) -> Result<Tensor> {
    let mut flat = Vec::with_capacity(states.len() * state_dim);
    for state in states {
        if state.len() != state_dim {
            return Err(Error::StateDimension {
                expected: state_dim,
                actual: state.len(),
            });
        }
        flat.extend(state.iter().map(|&x| x as f32));
    }
    Ok(Tensor::from_slice(&flat)
        .view([states.len() as i64, state_dim as i64])
        .to(device))
}

/// Splits a `[n, d]` tensor into `n` rows.
pub(crate) fn tensor_rows(t: &Tensor) -> Result<Vec<Vec<f32>>> {
    let size = t.size();
    let cols = size.last().copied().unwrap_or(0).max(1) as usize;
    let flat = Vec::<f32>::try_from(&t.to(Device::Cpu).to_kind(Kind::Float).flatten(0, -1))?;
    Ok(flat.chunks(cols).map(|c| c.to_vec()).collect())
}

/// MLP action-value network.
///
/// Architecture: `state_size → first_layer_size → second_layer_size →
/// num_actions` with ReLU activations.
pub struct QNetwork {
    vs: nn::VarStore,
    net: nn::Sequential,
    state_dim: usize,
    num_actions: usize,
}

impl QNetwork {
    pub fn new(config: &AgentConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let net = nn::seq()
            .add(nn::linear(
                p / "f1",
                config.state_size as i64,
                config.first_layer_size as i64,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
            .add(nn::linear(
                p / "f2",
                config.first_layer_size as i64,
                config.second_layer_size as i64,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
            .add(nn::linear(
                p / "f3",
                config.second_layer_size as i64,
                config.num_actions() as i64,
                Default::default(),
            ));

        Self {
            vs,
            net,
            state_dim: config.state_size,
            num_actions: config.num_actions(),
        }
    }

    /// Forward pass: `[n, state_dim] → [n, num_actions]`.
    pub fn forward(&self, states: &Tensor) -> Tensor {
        self.net.forward(states)
    }

    /// Index of the highest-valued action for a single state.
    pub fn greedy_action(&self, state: &State) -> Result<usize> {
        let input = states_tensor(&[state], self.state_dim, self.vs.device())?;
        let best = tch::no_grad(|| self.forward(&input).argmax(-1, false));
        Ok(best.int64_value(&[0]) as usize)
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Overwrites every parameter with the matching one of `source`.
    pub fn copy_from(&mut self, source: &QNetwork) -> Result<()> {
        self.vs.copy(&source.vs)?;
        Ok(())
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

/// Maps raw states into `[0, 1]^abstract_dim`.
///
/// Architecture: `state_size → h1 → h2 → abstract_dim`, ReLU hidden layers
/// and a sigmoid output.
pub struct StateEncoder {
    net: nn::Sequential,
}

impl StateEncoder {
    pub fn new(p: &nn::Path, config: &AgentConfig) -> Self {
        let [h1, h2] = config.state_encoder_hidden;
        let net = nn::seq()
            .add(nn::linear(
                p / "fc1",
                config.state_size as i64,
                h1 as i64,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "fc2", h1 as i64, h2 as i64, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(
                p / "fc3",
                h2 as i64,
                config.abstract_dim as i64,
                Default::default(),
            ))
            .add_fn(|x| x.sigmoid());
        Self { net }
    }

    pub fn forward(&self, states: &Tensor) -> Tensor {
        self.net.forward(states)
    }
}

/// Predicts the displacement every action causes in the abstract space.
///
/// Architecture: `abstract_dim + num_actions → h1 → h2 → abstract_dim`,
/// ReLU hidden layers, linear output.
pub struct ActionEncoder {
    net: nn::Sequential,
}

impl ActionEncoder {
    pub fn new(p: &nn::Path, config: &AgentConfig) -> Self {
        let [h1, h2] = config.action_encoder_hidden;
        let input = (config.abstract_dim + config.num_actions()) as i64;
        let net = nn::seq()
            .add(nn::linear(p / "linear1", input, h1 as i64, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "linear2", h1 as i64, h2 as i64, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(
                p / "linear3",
                h2 as i64,
                config.abstract_dim as i64,
                Default::default(),
            ));
        Self { net }
    }

    /// `[B, D]` embeddings and `[A, A]` one-hot actions to `[B, A, D]`
    /// displacements, one per (state, action) pair.
    pub fn forward(&self, abstract_states: &Tensor, action_onehots: &Tensor) -> Tensor {
        let batch = abstract_states.size()[0];
        let n_actions = action_onehots.size()[0];
        let states = abstract_states.unsqueeze(1).repeat([1, n_actions, 1]);
        let actions = action_onehots.unsqueeze(0).repeat([batch, 1, 1]);
        let za = Tensor::cat(&[states, actions], -1);
        self.net.forward(&za)
    }
}

/// State and action encoders sharing one variable store.
pub struct AbstractionModel {
    vs: nn::VarStore,
    state_encoder: StateEncoder,
    action_encoder: ActionEncoder,
    state_dim: usize,
    num_actions: usize,
}

impl AbstractionModel {
    pub fn new(config: &AgentConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let state_encoder = StateEncoder::new(&(&root / "state_encoder"), config);
        let action_encoder = ActionEncoder::new(&(&root / "action_encoder"), config);
        Self {
            vs,
            state_encoder,
            action_encoder,
            state_dim: config.state_size,
            num_actions: config.num_actions(),
        }
    }

    pub fn state_encoder(&self) -> &StateEncoder {
        &self.state_encoder
    }

    pub fn action_encoder(&self) -> &ActionEncoder {
        &self.action_encoder
    }

    /// Identity matrix enumerating every action as a one-hot row.
    pub fn action_onehots(&self) -> Tensor {
        Tensor::eye(self.num_actions as i64, (Kind::Float, self.vs.device()))
    }

    pub fn states_tensor(&self, states: &[&State]) -> Result<Tensor> {
        states_tensor(states, self.state_dim, self.vs.device())
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

impl StateEncoding for AbstractionModel {
    fn encode_states(&self, states: &[&State]) -> Result<Vec<Embedding>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let input = self.states_tensor(states)?;
        let encoded = tch::no_grad(|| self.state_encoder.forward(&input));
        tensor_rows(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AgentConfig {
        AgentConfig {
            first_layer_size: 16,
            second_layer_size: 16,
            abstract_dim: 4,
            state_encoder_hidden: [16, 16],
            action_encoder_hidden: [8, 8],
            ..AgentConfig::default()
        }
    }

    #[test]
    fn q_network_forward_shape() {
        let config = small_config();
        let (q, states) = with_seed(0, || {
            (
                QNetwork::new(&config, Device::Cpu),
                Tensor::randn([5, 3], (Kind::Float, Device::Cpu)),
            )
        });
        assert_eq!(q.forward(&states).size(), &[5, 81]);
    }

    #[test]
    fn greedy_action_in_range() {
        let config = small_config();
        let q = with_seed(1, || QNetwork::new(&config, Device::Cpu));
        let action = q.greedy_action(&vec![0.1, -0.2, 0.3]).unwrap();
        assert!(action < 81);
    }

    #[test]
    fn greedy_action_rejects_wrong_dimension() {
        let q = with_seed(2, || QNetwork::new(&small_config(), Device::Cpu));
        assert!(matches!(
            q.greedy_action(&vec![0.1, 0.2]),
            Err(Error::StateDimension {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn copy_from_makes_parameters_equal() {
        let config = small_config();
        let (source, mut target) = with_seed(3, || {
            (
                QNetwork::new(&config, Device::Cpu),
                QNetwork::new(&config, Device::Cpu),
            )
        });
        target.copy_from(&source).unwrap();
        let src = source.var_store().variables();
        for (name, t) in target.var_store().variables() {
            assert!(t.equal(&src[&name]), "parameter {name} differs");
        }
    }

    #[test]
    fn state_encoder_output_bounded() {
        let config = small_config();
        let model = with_seed(4, || AbstractionModel::new(&config, Device::Cpu));
        let states = vec![vec![3.0, -3.0, 0.5], vec![100.0, -100.0, 1.0]];
        let refs: Vec<&State> = states.iter().collect();
        let embeddings = model.encode_states(&refs).unwrap();
        assert_eq!(embeddings.len(), 2);
        for e in embeddings {
            assert_eq!(e.len(), 4);
            assert!(e.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn state_encoding_is_deterministic() {
        let model = with_seed(5, || AbstractionModel::new(&small_config(), Device::Cpu));
        let s = vec![0.3, 0.2, 0.1];
        let a = model.encode_states(&[&s]).unwrap();
        let b = model.encode_states(&[&s]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_seed_gives_same_parameters_across_threads() {
        let config = small_config();
        let flat = |q: &QNetwork| -> Vec<(String, Vec<f32>)> {
            let mut params: Vec<(String, Vec<f32>)> = q
                .var_store()
                .variables()
                .into_iter()
                .map(|(name, t)| (name, Vec::<f32>::try_from(&t.detach().flatten(0, -1)).unwrap()))
                .collect();
            params.sort_by(|a, b| a.0.cmp(&b.0));
            params
        };
        let reference = flat(&with_seed(42, || QNetwork::new(&config, Device::Cpu)));

        let built: Vec<Vec<(String, Vec<f32>)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let config = &config;
                    scope.spawn(move || {
                        let seed = if i % 2 == 0 { 42 } else { 43 };
                        let q = with_seed(seed, || QNetwork::new(config, Device::Cpu));
                        flat(&q)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (i, params) in built.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(params, &reference);
            } else {
                assert_ne!(params, &reference);
            }
        }
    }

    #[test]
    fn action_encoder_covers_every_pair() {
        let config = small_config();
        let (model, z) = with_seed(6, || {
            (
                AbstractionModel::new(&config, Device::Cpu),
                Tensor::rand([6, 4], (Kind::Float, Device::Cpu)),
            )
        });
        let out = model.action_encoder().forward(&z, &model.action_onehots());
        assert_eq!(out.size(), &[6, 81, 4]);
    }
}
