//! Run configuration for training, generation and the reference model.
//!
//! Defaults follow the command-line defaults. Every struct validates itself
//! before use so bad values surface as `TextGenError::Config` up front.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TextGenError};

// --- Model ---

/// Hyper-parameters of the hashed n-gram reference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of previous symbols forming the recurrent context.
    pub order: usize,
    /// Rows of the count table contexts are hashed into.
    pub buckets: usize,
    /// Additive smoothing applied to every count.
    pub smoothing: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            order: 4,
            buckets: 1 << 14,
            smoothing: 0.01,
        }
    }
}

impl ModelConfig {
    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<()> {
        if self.order == 0 {
            return Err(TextGenError::Config("model order must be at least 1".into()));
        }
        if self.buckets == 0 {
            return Err(TextGenError::Config("model needs at least one bucket".into()));
        }
        if !(self.smoothing.is_finite() && self.smoothing > 0.0) {
            return Err(TextGenError::Config(format!(
                "smoothing must be a positive number, got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

// --- Training ---

/// Where a training run restores its model from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Restore {
    /// Build a fresh model.
    #[default]
    No,
    /// Load the model stored at the checkpoint path.
    FromCheckpoint,
    /// Load the model stored at this path.
    From(PathBuf),
}

/// Settings for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Training corpus.
    pub text_path: PathBuf,
    /// Where checkpoints are written (its directory is cleared first).
    pub checkpoint_path: PathBuf,
    /// Restore behaviour.
    pub restore: Restore,
    /// Lanes per batch.
    pub batch_size: usize,
    /// Steps per lane per batch.
    pub seq_len: usize,
    /// Number of epochs to train.
    pub num_epochs: usize,
    /// Leading share of the corpus held out for validation.
    pub validation_split: f64,
    /// Read the corpus in chunks of this many bytes instead of loading it whole.
    pub stream_chunk_bytes: Option<usize>,
    /// Characters generated after every epoch.
    pub sample_length: usize,
    /// Sampling width after every epoch.
    pub sample_top_n: usize,
    /// Characters generated when training ends.
    pub final_sample_length: usize,
    /// Sampling width when training ends.
    pub final_sample_top_n: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            text_path: PathBuf::from("data/tinyshakespeare.txt"),
            checkpoint_path: PathBuf::from("checkpoints/model.bin"),
            restore: Restore::No,
            batch_size: 64,
            seq_len: 64,
            num_epochs: 32,
            validation_split: 0.2,
            stream_chunk_bytes: None,
            sample_length: 512,
            sample_top_n: 10,
            final_sample_length: 1024,
            final_sample_top_n: 3,
        }
    }
}

impl TrainConfig {
    /// Checks sizes and ratios.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.seq_len == 0 {
            return Err(TextGenError::Config(format!(
                "batch_size ({}) and seq_len ({}) must be positive",
                self.batch_size, self.seq_len
            )));
        }
        if self.num_epochs == 0 {
            return Err(TextGenError::Config("num_epochs must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(TextGenError::Config(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if self.stream_chunk_bytes == Some(0) {
            return Err(TextGenError::Config("stream_chunk_bytes must be positive".into()));
        }
        if self.sample_top_n == 0 || self.final_sample_top_n == 0 {
            return Err(TextGenError::Config("sampling top_n must be positive".into()));
        }
        Ok(())
    }

    /// Path the model is restored from, if any.
    pub fn restore_path(&self) -> Option<PathBuf> {
        match &self.restore {
            Restore::No => None,
            Restore::FromCheckpoint => Some(self.checkpoint_path.clone()),
            Restore::From(path) => Some(path.clone()),
        }
    }
}

// --- Generation ---

/// Where the generation seed comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// Use this text as the seed.
    Literal(String),
    /// Draw a random seed from this file.
    TextFile(PathBuf),
}

/// Settings for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Model to load.
    pub checkpoint_path: PathBuf,
    /// Seed text or a file to draw it from.
    pub seed: SeedSource,
    /// Characters to generate after the seed.
    pub length: usize,
    /// Sampling width.
    pub top_n: usize,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("checkpoints/model.bin"),
            seed: SeedSource::TextFile(PathBuf::from("data/tinyshakespeare.txt")),
            length: 1024,
            top_n: 3,
        }
    }
}

impl GenerateConfig {
    /// Checks the sampling width and seed.
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(TextGenError::Config("top_n must be positive".into()));
        }
        if let SeedSource::Literal(seed) = &self.seed {
            if seed.is_empty() {
                return Err(TextGenError::Config("seed must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ModelConfig::default().validate().unwrap();
        TrainConfig::default().validate().unwrap();
        GenerateConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_values_are_config_errors() {
        let train = TrainConfig {
            validation_split: 1.0,
            ..TrainConfig::default()
        };
        assert!(matches!(train.validate(), Err(TextGenError::Config(_))));

        let train = TrainConfig {
            seq_len: 0,
            ..TrainConfig::default()
        };
        assert!(train.validate().is_err());

        let model = ModelConfig {
            smoothing: 0.0,
            ..ModelConfig::default()
        };
        assert!(model.validate().is_err());

        let generate = GenerateConfig {
            seed: SeedSource::Literal(String::new()),
            ..GenerateConfig::default()
        };
        assert!(generate.validate().is_err());
    }

    #[test]
    fn restore_path_follows_restore_mode() {
        let mut train = TrainConfig::default();
        assert_eq!(train.restore_path(), None);
        train.restore = Restore::FromCheckpoint;
        assert_eq!(train.restore_path(), Some(train.checkpoint_path.clone()));
        train.restore = Restore::From(PathBuf::from("elsewhere.bin"));
        assert_eq!(train.restore_path(), Some(PathBuf::from("elsewhere.bin")));
    }
}
