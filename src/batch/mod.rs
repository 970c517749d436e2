//! Shape-stable `(inputs, targets)` batches for stateful sequence models.
//!
//! Both generators lay an encoded sequence out as a `(batch_size, width)` grid
//! of lanes and cut it into column slices of `seq_len`. Row `b` of batch `k + 1`
//! continues row `b` of batch `k`, so a recurrent model can carry its hidden
//! state from one batch to the next.

use crate::codec::one_hot;
use crate::error::{Result, TextGenError};
use crate::tensor::{Tensor, TensorError};

/// In-memory generator with epoch rotation.
pub mod in_memory;
/// Chunked generator for sources that do not fit in RAM.
pub mod streaming;

pub use in_memory::SequenceBatcher;
pub use streaming::{EpochBatch, StreamingBatcher};

// --- Batch Types ---

/// One side of a batch: raw ids `[B, L]` or one-hot floats `[B, L, V]`.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchTensor {
    /// Integer symbol ids, shape `[batch_size, seq_len]`.
    Ids(Tensor<usize>),
    /// One-hot expansion, shape `[batch_size, seq_len, vocab_size]`.
    OneHot(Tensor<f32>),
}

impl BatchTensor {
    /// Shape of the underlying tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Ids(t) => t.shape(),
            Self::OneHot(t) => t.shape(),
        }
    }

    /// `(batch_size, seq_len)`, checking that ids are rank 2 and one-hot rank 3.
    fn dims(&self) -> Result<(usize, usize)> {
        let rank = match self {
            Self::Ids(_) => 2,
            Self::OneHot(_) => 3,
        };
        let shape = self.shape();
        if shape.len() != rank {
            return Err(TensorError::RankMismatch {
                expected: rank,
                shape: shape.to_vec(),
            }
            .into());
        }
        Ok((shape[0], shape[1]))
    }

    /// Number of lanes.
    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.dims()?.0)
    }

    /// Number of steps per lane.
    pub fn seq_len(&self) -> Result<usize> {
        Ok(self.dims()?.1)
    }

    /// Ids as `[B, L]`, collapsing one-hot rows with argmax (lowest index on ties).
    pub fn to_ids(&self) -> Result<Tensor<usize>> {
        let (batch_size, seq_len) = self.dims()?;
        match self {
            Self::Ids(t) => Ok(t.clone()),
            Self::OneHot(t) => {
                let mut ids = Vec::with_capacity(batch_size * seq_len);
                for b in 0..batch_size {
                    for s in 0..seq_len {
                        let row = t.row(&[b, s])?;
                        let mut best = 0;
                        for (i, &v) in row.iter().enumerate() {
                            if v > row[best] {
                                best = i;
                            }
                        }
                        ids.push(best);
                    }
                }
                Ok(Tensor::raw(&[batch_size, seq_len], ids)?)
            }
        }
    }
}

/// An `(X, Y)` pair where `Y` is `X` shifted by one step within each lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Model inputs.
    pub inputs: BatchTensor,
    /// Next-symbol targets.
    pub targets: BatchTensor,
}

/// A batch pulled from a [`BatchSource`], with the state-reset decision attached.
#[derive(Debug, Clone)]
pub struct SourcedBatch {
    /// The batch itself.
    pub batch: Batch,
    /// The consumer must reset recurrent state before feeding this batch.
    pub reset_state: bool,
}

/// Pull-based producer of training batches.
///
/// Sources decide where lane continuity breaks; consumers only honour
/// `reset_state`.
pub trait BatchSource {
    /// Produces the next batch. Blocks on source reads where applicable.
    fn pull(&mut self) -> Result<SourcedBatch>;
}

// --- Geometry ---

/// Batch dimensions and expansion flags shared by both generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    /// Lanes per batch (`B`).
    pub batch_size: usize,
    /// Steps per lane per batch (`L`).
    pub seq_len: usize,
    /// Vocabulary size used for one-hot expansion.
    pub vocab_size: usize,
    /// Expand inputs to one-hot.
    pub one_hot_inputs: bool,
    /// Expand targets to one-hot.
    pub one_hot_targets: bool,
}

impl BatchShape {
    /// Ids-only shape: no one-hot expansion.
    pub fn new(batch_size: usize, seq_len: usize, vocab_size: usize) -> Self {
        Self {
            batch_size,
            seq_len,
            vocab_size,
            one_hot_inputs: false,
            one_hot_targets: false,
        }
    }

    /// Sets the one-hot flags.
    #[must_use]
    pub fn with_one_hot(mut self, inputs: bool, targets: bool) -> Self {
        self.one_hot_inputs = inputs;
        self.one_hot_targets = targets;
        self
    }

    /// Tokens consumed by one batch.
    pub fn tokens_per_batch(&self) -> usize {
        self.batch_size * self.seq_len
    }

    /// Number of full batches that fit in `len` tokens (one token reserved for the shift).
    pub fn num_batches(&self, len: usize) -> usize {
        len.saturating_sub(1) / self.tokens_per_batch()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.seq_len == 0 {
            return Err(TextGenError::Config(format!(
                "batch_size ({}) and seq_len ({}) must be positive",
                self.batch_size, self.seq_len
            )));
        }
        if self.vocab_size == 0 {
            return Err(TextGenError::Config("vocab_size must be positive".into()));
        }
        Ok(())
    }
}

/// Output row `logical_row` of epoch `epoch` reads grid row `(logical_row + epoch) mod batch_size`.
///
/// Index remapping only; the grid itself is never permuted.
pub fn physical_row(epoch: usize, logical_row: usize, batch_size: usize) -> usize {
    (logical_row + epoch % batch_size) % batch_size
}

/// An encoded sequence truncated to whole batches and viewed as lanes.
///
/// Holds `rounded_len + 1` tokens: grid row `r`, column `c` is input
/// `tokens[r * width + c]` with target `tokens[r * width + c + 1]`.
#[derive(Debug)]
pub(crate) struct LaneGrid {
    tokens: Vec<usize>,
    shape: BatchShape,
    num_batches: usize,
}

impl LaneGrid {
    /// Lays `sequence` out as lanes. Consumes the sequence to avoid a copy.
    pub(crate) fn new(mut sequence: Vec<usize>, shape: BatchShape, hint: &'static str) -> Result<Self> {
        shape.validate()?;
        let num_batches = shape.num_batches(sequence.len());
        if num_batches == 0 {
            return Err(TextGenError::InsufficientData {
                available: sequence.len(),
                batch_size: shape.batch_size,
                seq_len: shape.seq_len,
                hint,
            });
        }
        if shape.one_hot_inputs || shape.one_hot_targets {
            if let Some(&id) = sequence.iter().find(|&&id| id >= shape.vocab_size) {
                return Err(TextGenError::Decode {
                    id,
                    vocab_size: shape.vocab_size,
                });
            }
        }

        let rounded_len = num_batches * shape.tokens_per_batch();
        sequence.truncate(rounded_len + 1); // trailing remainder dropped
        sequence.shrink_to_fit();

        log::debug!(
            "lane grid: {} batches, effective length {}, grid {}x{}",
            num_batches,
            rounded_len,
            shape.batch_size,
            num_batches * shape.seq_len
        );

        Ok(Self {
            tokens: sequence,
            shape,
            num_batches,
        })
    }

    pub(crate) fn num_batches(&self) -> usize {
        self.num_batches
    }

    fn width(&self) -> usize {
        self.num_batches * self.shape.seq_len
    }

    /// Column slice `index` with rows rotated for `epoch`.
    pub(crate) fn slice(&self, index: usize, epoch: usize) -> Result<Batch> {
        let BatchShape {
            batch_size,
            seq_len,
            ..
        } = self.shape;
        let width = self.width();
        let mut xs = Vec::with_capacity(batch_size * seq_len);
        let mut ys = Vec::with_capacity(batch_size * seq_len);
        for row in 0..batch_size {
            let start = physical_row(epoch, row, batch_size) * width + index * seq_len;
            xs.extend_from_slice(&self.tokens[start..start + seq_len]);
            ys.extend_from_slice(&self.tokens[start + 1..start + seq_len + 1]);
        }
        Ok(Batch {
            inputs: self.expand(xs, self.shape.one_hot_inputs)?,
            targets: self.expand(ys, self.shape.one_hot_targets)?,
        })
    }

    fn expand(&self, ids: Vec<usize>, as_one_hot: bool) -> Result<BatchTensor> {
        let ids = Tensor::raw(&[self.shape.batch_size, self.shape.seq_len], ids)?;
        if as_one_hot {
            Ok(BatchTensor::OneHot(one_hot(&ids, self.shape.vocab_size)?))
        } else {
            Ok(BatchTensor::Ids(ids))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_row_rotates_by_epoch() {
        assert_eq!(physical_row(0, 2, 4), 2);
        assert_eq!(physical_row(1, 2, 4), 3);
        assert_eq!(physical_row(1, 3, 4), 0);
        assert_eq!(physical_row(9, 0, 4), 1);
    }

    #[test]
    fn grid_slices_are_shifted_lanes() {
        let shape = BatchShape::new(2, 3, 100);
        // 13 tokens -> (13 - 1) / 6 = 2 batches, width 6
        let grid = LaneGrid::new((0..13).collect(), shape, "test").unwrap();
        assert_eq!(grid.num_batches(), 2);

        let first = grid.slice(0, 0).unwrap();
        assert_eq!(first.inputs, BatchTensor::Ids(Tensor::raw(&[2, 3], vec![0, 1, 2, 6, 7, 8]).unwrap()));
        assert_eq!(first.targets, BatchTensor::Ids(Tensor::raw(&[2, 3], vec![1, 2, 3, 7, 8, 9]).unwrap()));

        let rotated = grid.slice(1, 1).unwrap();
        assert_eq!(rotated.inputs, BatchTensor::Ids(Tensor::raw(&[2, 3], vec![9, 10, 11, 3, 4, 5]).unwrap()));
    }

    #[test]
    fn one_hot_round_trips_through_argmax() {
        let shape = BatchShape::new(1, 4, 10).with_one_hot(true, true);
        let grid = LaneGrid::new(vec![3, 1, 4, 1, 5, 9], shape, "test").unwrap();
        let batch = grid.slice(0, 0).unwrap();
        assert_eq!(batch.inputs.shape(), &[1, 4, 10]);
        assert_eq!(batch.targets.to_ids().unwrap().blob(), &[1, 4, 1, 5]);
    }

    #[test]
    fn one_hot_rejects_ids_outside_vocabulary() {
        let shape = BatchShape::new(1, 2, 4).with_one_hot(false, true);
        assert!(matches!(
            LaneGrid::new(vec![1, 2, 7, 3], shape, "test"),
            Err(TextGenError::Decode { id: 7, .. })
        ));
    }

    #[test]
    fn wrong_rank_is_an_error_not_a_panic() {
        let flat = BatchTensor::Ids(Tensor::raw(&[4], vec![1, 2, 3, 4]).unwrap());
        assert!(matches!(
            flat.to_ids(),
            Err(TextGenError::Tensor(TensorError::RankMismatch { expected: 2, .. }))
        ));
        assert!(flat.batch_size().is_err());

        let ids_as_one_hot = BatchTensor::OneHot(Tensor::raw(&[2, 3], vec![0.0; 6]).unwrap());
        assert!(ids_as_one_hot.seq_len().is_err());

        let one_hot = BatchTensor::OneHot(Tensor::raw(&[2, 3, 4], vec![0.0; 24]).unwrap());
        assert_eq!(one_hot.batch_size().unwrap(), 2);
        assert_eq!(one_hot.seq_len().unwrap(), 3);
    }

    #[test]
    fn zero_dimensions_are_config_errors() {
        let shape = BatchShape::new(0, 2, 4);
        assert!(matches!(LaneGrid::new(vec![1; 10], shape, "test"), Err(TextGenError::Config(_))));
    }
}
