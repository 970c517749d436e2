#![warn(missing_docs)] // Enforce documentation coverage at the warning level

//! # femto-charnn
//!
//! `femto-charnn` is the data and generation core of a character-level
//! recurrent text generator. It turns raw text into shape-stable training
//! batches for a stateful sequence model and drives that model one step at a
//! time to generate new text.
//!
//! ## Key Components:
//!
//! *   [`SymbolCodec`]: Fixed mapping between printable characters and integer ids
//!     (`0` is reserved for unknown characters).
//! *   [`SequenceBatcher`]: Infinite in-memory batch stream. Lanes stay continuous
//!     across batches and epochs, so recurrent state never needs resetting.
//! *   [`StreamingBatcher`]: The same batch contract over a file read in bounded
//!     chunks. Reports epochs; consumers reset state when the epoch changes.
//! *   [`generate_seed`], [`sample`] and [`generate`]: Seed selection, top-n
//!     sampling and the `Idle -> Priming -> Generating -> Done` generation loop.
//! *   [`SequenceModel`]: The trainable model the pipeline drives, with a hashed
//!     n-gram reference implementation ([`HashedNGram`]).
//! *   [`fit`] and [`Callback`]: Epoch-driven training with sample logging,
//!     checkpointing and CSV metrics hooks.
//!
//! ## Features
//!
//! *   `cli` (default): Builds the `femto-charnn` binary (`clap`, `env_logger`).
//!
//! ## Example
//!
//! ```no_run
//! use femto_charnn::{
//!     fit, generate, BatchShape, HashedNGram, ModelConfig, SequenceBatcher, SequenceModel,
//!     SymbolCodec, TextGenError,
//! };
//! use rand::thread_rng;
//!
//! # fn main() -> Result<(), TextGenError> {
//! let codec = SymbolCodec::new();
//! let text = std::fs::read_to_string("input.txt")?;
//!
//! // --- Training ---
//! let shape = BatchShape::new(32, 64, codec.vocab_size()).with_one_hot(false, true);
//! let mut batches = SequenceBatcher::new(codec.encode(&text), shape)?;
//! let steps = batches.num_batches();
//! let mut model = HashedNGram::new(ModelConfig::default(), 32, codec.vocab_size())?;
//! fit(&mut model, &mut batches, steps, 4, None, &mut [])?;
//!
//! // --- Generation ---
//! let mut inference = femto_charnn::model::build_inference_model(&model)?;
//! let sample = generate(&mut inference, &codec, &mut thread_rng(), "ROMEO:", 200, 3)?;
//! println!("{}", sample);
//! # Ok(())
//! # }
//! ```

// --- Module Declarations ---

/// Shape-stable `(inputs, targets)` batch generators.
pub mod batch;
/// Training hooks: sample logging, checkpoints, metrics.
pub mod callbacks;
/// Character/id mapping and one-hot expansion.
pub mod codec;
/// Run configuration with validation.
pub mod config;
/// Crate-wide error taxonomy.
pub mod error;
/// Autoregressive generation state machine.
pub mod generate;
/// Filesystem helpers: checkpoint directories, atomic writes, bounded reads.
pub mod io;
/// The sequence model interface and the reference model.
pub mod model;
/// Truncated (top-n) weighted sampling.
pub mod sampler;
/// Random seed selection from a corpus.
pub mod seed;
/// Minimal owned n-dimensional array.
pub mod tensor;
/// Epoch loop driving a model over batch sources.
pub mod train;

// --- Public API Re-exports ---

pub use batch::{Batch, BatchShape, BatchSource, BatchTensor, SequenceBatcher, StreamingBatcher};
pub use callbacks::{CheckpointSaver, MetricsRecorder, SampleLogger};
pub use codec::{SymbolCodec, UNKNOWN_ID, VOCAB_SIZE};
pub use config::{GenerateConfig, ModelConfig, Restore, SeedSource, TrainConfig};
pub use error::{Result, TextGenError};
pub use generate::{generate, GenerationState, Generator};
pub use model::{HashedNGram, SequenceModel, Weights};
pub use sampler::sample;
pub use seed::generate_seed;
pub use tensor::{Tensor, TensorError};
pub use train::{fit, Callback, EpochLogs, TrainLogs, Validation};
