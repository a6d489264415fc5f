use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the equivalence-augmented Q-learning stack.
///
/// None of these are retried. Every variant points either at a malformed
/// configuration or at a broken internal invariant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse TOML configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to parse JSON configuration: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Equivalence lookup for a key missing from the abstract-state cache: {0}")]
    CacheMiss(String),

    #[error("Cannot normalize values over a zero range (min = max = {0})")]
    DegenerateRange(f64),

    #[error("Action index {index} is out of range for {num_actions} actions")]
    InvalidAction { index: usize, num_actions: usize },

    #[error("State has {actual} components, expected {expected}")]
    StateDimension { expected: usize, actual: usize },

    #[error("Encoder returned {actual} embeddings for {expected} states")]
    EncoderMismatch { expected: usize, actual: usize },

    #[error("Malformed result record in {path}: {reason}")]
    ResultFormat { path: PathBuf, reason: String },

    #[cfg(feature = "nn")]
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] tch::TchError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
