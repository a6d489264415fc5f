//! eqdqn - Equivalence-augmented deep Q-learning
//!
//! A DQN agent for a two-wheeled, wheelchair-like robot that learns an
//! abstract state embedding alongside its Q-network and borrows TD targets
//! across transitions the embedding deems equivalent.

pub mod algorithms;
pub mod error;

pub use algorithms::Agent;
pub use error::{Error, Result};
