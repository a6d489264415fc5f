//! Training infrastructure for the equivalence-augmented DQN.
//!
//! Replay buffer, episode runner and sweep pool are always available. The
//! abstraction trainer and the agent itself need the `nn` feature.

pub mod buffer;
pub mod runner;
pub mod sweep;

#[cfg(feature = "nn")]
pub mod abstraction;
#[cfg(feature = "nn")]
pub mod dqn;

pub use buffer::ReplayBuffer;
pub use runner::{run_episode, run_experiment, train_agent};
pub use sweep::{plan_sweep, run_all, SweepTask};

#[cfg(feature = "nn")]
pub use abstraction::{AbstractionLosses, AbstractionTrainer};
#[cfg(feature = "nn")]
pub use dqn::{DqnLosses, EquivalenceDqnAgent};
