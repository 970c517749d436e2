use super::{Batch, BatchShape, BatchSource, LaneGrid, SourcedBatch};
use crate::error::Result;

/// Infinite, epoch-aware batch stream over a fully materialized sequence.
///
/// Each epoch walks the `num_batches` column slices of the lane grid. At
/// epoch `e` output row `i` reads grid row `(i + e) mod B`, so output row `i`
/// picks up exactly where it stopped at the end of the previous epoch and
/// the consumer never has to reset recurrent state between epochs.
///
/// The iterator never returns `None`.
#[derive(Debug)]
pub struct SequenceBatcher {
    grid: LaneGrid,
    epoch: usize,
    next_index: usize,
}

impl SequenceBatcher {
    /// Builds the lane grid for `sequence`.
    ///
    /// # Errors
    /// `InsufficientData` when `(len - 1) / (batch_size * seq_len)` is zero,
    /// `Config` for zero dimensions, `Decode` for ids outside the vocabulary
    /// when one-hot expansion is requested.
    pub fn new(sequence: Vec<usize>, shape: BatchShape) -> Result<Self> {
        let grid = LaneGrid::new(
            sequence,
            shape,
            "use a smaller batch size or sequence length, or supply more text",
        )?;
        Ok(Self {
            grid,
            epoch: 0,
            next_index: 0,
        })
    }

    /// Batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.grid.num_batches()
    }

    /// Epoch of the next batch to be produced (starts at 0).
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn next_batch(&mut self) -> Result<Batch> {
        let batch = self.grid.slice(self.next_index, self.epoch)?;
        self.next_index += 1;
        if self.next_index == self.grid.num_batches() {
            self.next_index = 0;
            self.epoch += 1;
        }
        Ok(batch)
    }
}

impl Iterator for SequenceBatcher {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

impl BatchSource for SequenceBatcher {
    fn pull(&mut self) -> Result<SourcedBatch> {
        // Lanes stay continuous across epochs.
        Ok(SourcedBatch {
            batch: self.next_batch()?,
            reset_state: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{physical_row, BatchTensor};
    use crate::error::TextGenError;

    fn ids(t: &BatchTensor) -> Vec<usize> {
        t.to_ids().unwrap().into_blob()
    }

    #[test]
    fn too_little_data_is_rejected() {
        let err = SequenceBatcher::new(vec![1, 2, 3], BatchShape::new(4, 4, 98)).unwrap_err();
        assert!(matches!(err, TextGenError::InsufficientData { available: 3, .. }));
    }

    #[test]
    fn every_batch_has_the_configured_shape() {
        let shape = BatchShape::new(3, 5, 98).with_one_hot(false, true);
        let batcher = SequenceBatcher::new((0..97).cycle().take(400).collect(), shape).unwrap();
        for batch in batcher.take(100) {
            let batch = batch.unwrap();
            assert_eq!(batch.inputs.shape(), &[3, 5]);
            assert_eq!(batch.targets.shape(), &[3, 5, 98]);
        }
    }

    #[test]
    fn lanes_are_contiguous_within_an_epoch() {
        let (b, l) = (3, 4);
        let sequence: Vec<usize> = (0..50).collect();
        let mut batcher = SequenceBatcher::new(sequence, BatchShape::new(b, l, 100)).unwrap();
        let n = batcher.num_batches(); // (50 - 1) / 12 = 4
        assert_eq!(n, 4);

        let mut lanes = vec![Vec::new(); b];
        for _ in 0..n {
            let batch = batcher.next().unwrap().unwrap();
            let xs = ids(&batch.inputs);
            let ys = ids(&batch.targets);
            for row in 0..b {
                for t in 0..l {
                    // shift by one inside the lane
                    assert_eq!(ys[row * l + t], xs[row * l + t] + 1);
                }
                lanes[row].extend_from_slice(&xs[row * l..(row + 1) * l]);
            }
        }
        let width = n * l;
        for (row, lane) in lanes.iter().enumerate() {
            let expected: Vec<usize> = (row * width..(row + 1) * width).collect();
            assert_eq!(lane, &expected);
        }
        assert_eq!(batcher.epoch(), 1);
    }

    #[test]
    fn output_rows_continue_across_epoch_boundaries() {
        let (b, l) = (4, 2);
        let sequence: Vec<usize> = (0..41).collect(); // exactly 5 batches, width 10
        let mut batcher = SequenceBatcher::new(sequence, BatchShape::new(b, l, 100)).unwrap();
        let n = batcher.num_batches();
        let width = n * l;

        let mut previous_last: Option<Vec<usize>> = None;
        for epoch in 0..6 {
            let batches: Vec<Batch> = (0..n).map(|_| batcher.next().unwrap().unwrap()).collect();
            let first = ids(&batches[0].inputs);
            for row in 0..b {
                // grid row assignment follows the rotation
                assert_eq!(first[row * l], physical_row(epoch, row, b) * width);
                if let Some(last) = &previous_last {
                    let end = last[row * l + l - 1];
                    let wrapped = physical_row(epoch, row, b) == 0;
                    if !wrapped {
                        assert_eq!(first[row * l], end + 1, "row {row} epoch {epoch}");
                    }
                }
            }
            previous_last = Some(ids(&batches[n - 1].inputs));
        }
    }

    #[test]
    fn lane_moves_down_one_output_row_per_epoch() {
        let (b, l) = (3, 2);
        let mut batcher = SequenceBatcher::new((0..13).collect(), BatchShape::new(b, l, 100)).unwrap();
        let n = batcher.num_batches(); // 2
        let epoch0 = ids(&batcher.next().unwrap().unwrap().inputs);
        for _ in 1..n {
            batcher.next();
        }
        let epoch1 = ids(&batcher.next().unwrap().unwrap().inputs);
        // Grid lane shown at output row b in epoch 0 is shown at row b - 1 in epoch 1.
        for row in 1..b {
            assert_eq!(epoch1[(row - 1) * l], epoch0[row * l]);
        }
    }

    #[test]
    fn trailing_remainder_is_dropped_every_pass() {
        let mut batcher = SequenceBatcher::new((0..30).collect(), BatchShape::new(2, 4, 100)).unwrap();
        assert_eq!(batcher.num_batches(), 3); // 24 usable tokens + 1 shift
        let max_seen = (0..30)
            .map(|_| batcher.next().unwrap().unwrap())
            .flat_map(|batch| ids(&batch.targets))
            .max()
            .unwrap();
        assert_eq!(max_seen, 24);
    }
}
