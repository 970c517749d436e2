//! The trainable sequence model the pipeline drives.
//!
//! The pipeline only depends on [`SequenceModel`]. A model owns exactly one
//! recurrent-state slot, so the training loop and inference each get their own
//! instance and weights move between them with [`transfer_weights`].

use std::path::Path;

use crate::batch::Batch;
use crate::error::Result;
use crate::tensor::Tensor;

/// Hashed n-gram reference implementation.
pub mod ngram;

pub use ngram::HashedNGram;

/// Model parameters as a list of tensors, in a model-defined order.
///
/// Double precision keeps integer-valued parameters such as counts exact up
/// to 2^53.
pub type Weights = Vec<Tensor<f64>>;

/// A stateful next-symbol model with a fixed batch size.
pub trait SequenceModel: Sized {
    /// Lanes processed per call.
    fn batch_size(&self) -> usize;

    /// Size of the output distribution.
    fn vocab_size(&self) -> usize;

    /// One step of inference: ids `[batch, 1]` to distributions `[batch, 1, vocab]`.
    ///
    /// Advances the recurrent state of every lane.
    fn predict_step(&mut self, input_ids: &Tensor<usize>) -> Result<Tensor<f32>>;

    /// Learns from one batch, continuing from the current recurrent state. Returns the batch loss.
    fn train_batch(&mut self, batch: &Batch) -> Result<f32>;

    /// Scores one batch without learning. Advances recurrent state like `train_batch`.
    fn evaluate_batch(&mut self, batch: &Batch) -> Result<f32>;

    /// Clears the recurrent state of every lane.
    fn reset_state(&mut self);

    /// Snapshot of the parameters.
    fn get_weights(&self) -> Weights;

    /// Replaces the parameters. Shapes must match the model's own.
    fn set_weights(&mut self, weights: &Weights) -> Result<()>;

    /// Same architecture with another batch size, fresh weights and fresh state.
    fn rebuild(&self, batch_size: usize) -> Result<Self>;

    /// Persists the model.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restores a model written by `save`.
    fn load(path: &Path) -> Result<Self>;
}

/// Copies the parameters of `from` into `to`.
pub fn transfer_weights<M: SequenceModel>(from: &M, to: &mut M) -> Result<()> {
    to.set_weights(&from.get_weights())
}

/// Builds an inference copy of `model` (batch size 1) holding its current weights.
pub fn build_inference_model<M: SequenceModel>(model: &M) -> Result<M> {
    log::info!("building inference model");
    let mut inference = model.rebuild(1)?;
    transfer_weights(model, &mut inference)?;
    Ok(inference)
}
