use std::collections::VecDeque;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{SequenceModel, Weights};
use crate::batch::Batch;
use crate::config::ModelConfig;
use crate::error::{Result, TextGenError};
use crate::io::write_atomic;
use crate::tensor::Tensor;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Stateful n-gram model with hashed contexts.
///
/// The recurrent state of a lane is its last `order` input ids. Contexts are
/// hashed into the rows of a `[buckets, vocab]` count table, which is the
/// model's only weight tensor. Predictions are additive-smoothed row
/// frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashedNGram {
    config: ModelConfig,
    vocab_size: usize,
    batch_size: usize,
    counts: Tensor<f64>,
    #[serde(skip)]
    lanes: Vec<VecDeque<usize>>,
}

/// Row of the count table for a context.
fn bucket(context: &VecDeque<usize>, buckets: usize) -> usize {
    let mut hash = FNV_OFFSET;
    for &id in context {
        for byte in (id as u32).to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash ^= context.len() as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
    (hash % buckets as u64) as usize
}

/// Read-only view used by the per-lane workers.
struct CountView<'a> {
    counts: &'a Tensor<f64>,
    config: &'a ModelConfig,
    vocab_size: usize,
}

impl CountView<'_> {
    /// Pushes `id` into the lane context and returns the row to predict from.
    fn advance(&self, lane: &mut VecDeque<usize>, id: usize) -> Result<usize> {
        if id >= self.vocab_size {
            return Err(TextGenError::Inference(format!(
                "input id {} outside vocabulary of {}",
                id, self.vocab_size
            )));
        }
        lane.push_back(id);
        if lane.len() > self.config.order {
            lane.pop_front();
        }
        Ok(bucket(lane, self.config.buckets))
    }

    fn probability(&self, row: usize, id: usize) -> Result<f64> {
        let counts = self.counts.row(&[row])?;
        let total: f64 = counts.iter().sum();
        let alpha = f64::from(self.config.smoothing);
        Ok((counts[id] + alpha) / (total + alpha * self.vocab_size as f64))
    }

    /// Normalized in f64; only the returned probabilities are narrowed.
    fn distribution(&self, row: usize) -> Result<Vec<f32>> {
        let counts = self.counts.row(&[row])?;
        let total: f64 = counts.iter().sum();
        let alpha = f64::from(self.config.smoothing);
        let norm = total + alpha * self.vocab_size as f64;
        Ok(counts.iter().map(|&c| ((c + alpha) / norm) as f32).collect())
    }

    /// Walks one lane through a batch row; returns summed NLL and the observed `(row, target)` pairs.
    fn score_lane(&self, lane: &mut VecDeque<usize>, xs: &[usize], ys: &[usize]) -> Result<(f64, Vec<(usize, usize)>)> {
        let mut nll = 0.0;
        let mut observed = Vec::with_capacity(xs.len());
        for (&x, &y) in xs.iter().zip(ys) {
            let row = self.advance(lane, x)?;
            if y >= self.vocab_size {
                return Err(TextGenError::Inference(format!(
                    "target id {} outside vocabulary of {}",
                    y, self.vocab_size
                )));
            }
            nll -= self.probability(row, y)?.ln();
            observed.push((row, y));
        }
        Ok((nll, observed))
    }
}

impl HashedNGram {
    /// Builds an untrained model.
    pub fn new(config: ModelConfig, batch_size: usize, vocab_size: usize) -> Result<Self> {
        config.validate()?;
        if batch_size == 0 || vocab_size == 0 {
            return Err(TextGenError::Config(format!(
                "batch_size ({}) and vocab_size ({}) must be positive",
                batch_size, vocab_size
            )));
        }
        log::info!(
            "building model: batch_size={}, vocab_size={}, order={}, buckets={}, smoothing={}",
            batch_size,
            vocab_size,
            config.order,
            config.buckets,
            config.smoothing
        );
        let counts = Tensor::zeros(&[config.buckets, vocab_size]);
        Ok(Self {
            config,
            vocab_size,
            batch_size,
            counts,
            lanes: vec![VecDeque::new(); batch_size],
        })
    }

    /// The model's hyper-parameters.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn check_batch(&self, batch: &Batch) -> Result<(Tensor<usize>, Tensor<usize>)> {
        let xs = batch.inputs.to_ids()?;
        let ys = batch.targets.to_ids()?;
        if xs.shape() != ys.shape() || xs.shape()[0] != self.batch_size {
            return Err(TextGenError::Inference(format!(
                "batch shapes {:?}/{:?} do not match model batch size {}",
                xs.shape(),
                ys.shape(),
                self.batch_size
            )));
        }
        Ok((xs, ys))
    }

    /// Runs every lane of a batch in parallel. Returns mean NLL and per-lane observations in lane order.
    fn score_batch(&mut self, batch: &Batch) -> Result<(f32, Vec<Vec<(usize, usize)>>)> {
        let (xs, ys) = self.check_batch(batch)?;
        let seq_len = xs.shape()[1];
        let view = CountView {
            counts: &self.counts,
            config: &self.config,
            vocab_size: self.vocab_size,
        };

        let per_lane: Vec<(f64, Vec<(usize, usize)>)> = self
            .lanes
            .par_iter_mut()
            .enumerate()
            .map(|(b, lane)| {
                let span = b * seq_len..(b + 1) * seq_len;
                view.score_lane(lane, &xs.blob()[span.clone()], &ys.blob()[span])
            })
            .collect::<Result<_>>()?;

        let tokens = (self.batch_size * seq_len).max(1);
        let nll: f64 = per_lane.iter().map(|(nll, _)| nll).sum();
        let observed = per_lane.into_iter().map(|(_, observed)| observed).collect();
        Ok(((nll / tokens as f64) as f32, observed))
    }
}

impl SequenceModel for HashedNGram {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn predict_step(&mut self, input_ids: &Tensor<usize>) -> Result<Tensor<f32>> {
        if input_ids.shape() != [self.batch_size, 1] {
            return Err(TextGenError::Inference(format!(
                "expected input shape [{}, 1], got {:?}",
                self.batch_size,
                input_ids.shape()
            )));
        }
        let view = CountView {
            counts: &self.counts,
            config: &self.config,
            vocab_size: self.vocab_size,
        };
        let mut out = Vec::with_capacity(self.batch_size * self.vocab_size);
        for (lane, &id) in self.lanes.iter_mut().zip(input_ids.blob()) {
            let row = view.advance(lane, id)?;
            out.extend(view.distribution(row)?);
        }
        Ok(Tensor::raw(&[self.batch_size, 1, self.vocab_size], out)?)
    }

    fn train_batch(&mut self, batch: &Batch) -> Result<f32> {
        let (loss, observed) = self.score_batch(batch)?;
        let vocab_size = self.vocab_size;
        let counts = self.counts.blob_mut();
        for (row, y) in observed.into_iter().flatten() {
            counts[row * vocab_size + y] += 1.0;
        }
        Ok(loss)
    }

    fn evaluate_batch(&mut self, batch: &Batch) -> Result<f32> {
        Ok(self.score_batch(batch)?.0)
    }

    fn reset_state(&mut self) {
        self.lanes = vec![VecDeque::new(); self.batch_size];
    }

    fn get_weights(&self) -> Weights {
        vec![self.counts.clone()]
    }

    fn set_weights(&mut self, weights: &Weights) -> Result<()> {
        match weights.as_slice() {
            [counts] if counts.shape() == self.counts.shape() => {
                self.counts = counts.clone();
                Ok(())
            }
            _ => Err(TextGenError::Inference(format!(
                "weights {:?} do not match count table {:?}",
                weights.iter().map(Tensor::shape).collect::<Vec<_>>(),
                self.counts.shape()
            ))),
        }
    }

    fn rebuild(&self, batch_size: usize) -> Result<Self> {
        Self::new(self.config.clone(), batch_size, self.vocab_size)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        write_atomic(path, &bytes)?;
        log::info!("model saved: {:?}", path);
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut model: Self = bincode::deserialize(&bytes)?;
        model.config.validate()?;
        if model.counts.shape() != [model.config.buckets, model.vocab_size] {
            return Err(TextGenError::Inference(format!(
                "corrupt checkpoint {:?}: count table {:?} for {} buckets x {} symbols",
                path,
                model.counts.shape(),
                model.config.buckets,
                model.vocab_size
            )));
        }
        model.reset_state();
        log::info!("model restored: {:?}", path);
        Ok(model)
    }
}
