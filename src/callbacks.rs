//! Training hooks shipped with the crate.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::codec::SymbolCodec;
use crate::error::Result;
use crate::generate::generate;
use crate::model::{build_inference_model, transfer_weights, SequenceModel};
use crate::seed::{generate_seed, DEFAULT_SEED_LENGTHS};
use crate::train::{Callback, EpochLogs, TrainLogs};

// --- Sample Logger ---

/// Logs a freshly seeded text sample after every epoch and when training ends.
///
/// Owns a batch-size-1 copy of the model. Weights are copied in before each
/// sample, so the training model's recurrent state is never touched.
pub struct SampleLogger<M, R> {
    inference: M,
    codec: SymbolCodec,
    seed_text: String,
    rng: R,
    epoch_length: usize,
    epoch_top_n: usize,
    final_length: usize,
    final_top_n: usize,
    last_sample: Option<String>,
}

impl<M: SequenceModel, R: Rng> SampleLogger<M, R> {
    /// Builds the inference copy of `model`. Seeds are drawn from `seed_text`.
    pub fn new(model: &M, seed_text: String, rng: R) -> Result<Self> {
        Ok(Self {
            inference: build_inference_model(model)?,
            codec: SymbolCodec::new(),
            seed_text,
            rng,
            epoch_length: 512,
            epoch_top_n: 10,
            final_length: 1024,
            final_top_n: 3,
            last_sample: None,
        })
    }

    /// Sample length and width used after each epoch.
    #[must_use]
    pub fn with_epoch_sample(mut self, length: usize, top_n: usize) -> Self {
        self.epoch_length = length;
        self.epoch_top_n = top_n;
        self
    }

    /// Sample length and width used when training ends.
    #[must_use]
    pub fn with_final_sample(mut self, length: usize, top_n: usize) -> Self {
        self.final_length = length;
        self.final_top_n = top_n;
        self
    }

    /// The most recent sample, seed included.
    pub fn last_sample(&self) -> Option<&str> {
        self.last_sample.as_deref()
    }

    fn sample(&mut self, model: &M, length: usize, top_n: usize) -> Result<()> {
        transfer_weights(model, &mut self.inference)?;
        let seed = generate_seed(&mut self.rng, &self.seed_text, &DEFAULT_SEED_LENGTHS)?;
        let text = generate(&mut self.inference, &self.codec, &mut self.rng, &seed, length, top_n)?;
        self.last_sample = Some(text);
        Ok(())
    }
}

impl<M: SequenceModel, R: Rng> Callback<M> for SampleLogger<M, R> {
    fn on_epoch_end(&mut self, _logs: &EpochLogs, model: &M) -> Result<()> {
        self.sample(model, self.epoch_length, self.epoch_top_n)
    }

    fn on_train_end(&mut self, _logs: &TrainLogs, model: &M) -> Result<()> {
        self.sample(model, self.final_length, self.final_top_n)
    }
}

// --- Checkpoints ---

/// Saves the training model after every epoch, overwriting the previous checkpoint.
pub struct CheckpointSaver {
    path: PathBuf,
}

impl CheckpointSaver {
    /// Saves to `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<M: SequenceModel> Callback<M> for CheckpointSaver {
    fn on_epoch_end(&mut self, logs: &EpochLogs, model: &M) -> Result<()> {
        log::debug!("epoch {}: saving checkpoint {:?}", logs.epoch, self.path);
        model.save(&self.path)
    }
}

// --- Metrics ---

/// Header row of the metrics file.
pub const METRICS_HEADER: &str = "epoch,duration_secs,loss,val_loss";

/// Appends one CSV row per epoch: `epoch,duration_secs,loss,val_loss`.
///
/// The file is recreated with a header when training begins. `val_loss` is
/// left empty without validation.
pub struct MetricsRecorder {
    path: PathBuf,
}

impl MetricsRecorder {
    /// Records to `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Metrics file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn row(logs: &EpochLogs) -> String {
        let val_loss = logs.val_loss.map(|v| format!("{v:.6}")).unwrap_or_default();
        format!(
            "{},{:.3},{:.6},{}",
            logs.epoch,
            logs.duration.as_secs_f64(),
            logs.loss,
            val_loss
        )
    }
}

impl<M> Callback<M> for MetricsRecorder {
    fn on_train_begin(&mut self, _model: &M) -> Result<()> {
        fs::write(&self.path, format!("{METRICS_HEADER}\n"))?;
        log::debug!("recording metrics to {:?}", self.path);
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochLogs, _model: &M) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", Self::row(logs))?;
        Ok(())
    }
}
