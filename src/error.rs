use thiserror::Error;

use crate::tensor::TensorError;

// --- Custom Error Type ---
// Every failure in the pipeline is a configuration or data-integrity problem.
// None of them are retried; they surface to the caller as-is.

/// Errors produced by the batching, sampling and generation pipeline.
#[derive(Debug, Error)]
pub enum TextGenError {
    /// Batch dimensions are too large for the available data.
    #[error("insufficient data: {available} tokens cannot fill one batch of {batch_size}x{seq_len} (+1 shifted target); {hint}")]
    InsufficientData {
        /// Number of encoded tokens that were available.
        available: usize,
        /// Requested number of lanes.
        batch_size: usize,
        /// Requested sequence length per lane.
        seq_len: usize,
        /// What the caller can change to fix it.
        hint: &'static str,
    },

    /// A symbol id lies outside the vocabulary (vocabulary mismatch).
    #[error("cannot decode id {id}: vocabulary size is {vocab_size}")]
    Decode {
        /// The offending id.
        id: usize,
        /// Size of the vocabulary used for decoding.
        vocab_size: usize,
    },

    /// Top-n truncation left nothing to sample from.
    #[error("degenerate distribution: {0}")]
    DegenerateDistribution(String),

    /// Seed source text (or seed) is too short.
    #[error("range error: {0}")]
    Range(String),

    /// Opaque failure of the sequence model.
    #[error("inference error: {0}")]
    Inference(String),

    /// Shape or indexing failure on a tensor.
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure (source reads, checkpoint files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TextGenError>;
