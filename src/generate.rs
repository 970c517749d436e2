//! Autoregressive text generation.
//!
//! A [`Generator`] walks `Idle -> Priming -> Generating -> Done`:
//!
//! - `Idle -> Priming`: the model's recurrent state is reset.
//! - `Priming`: every seed symbol except the last is fed through the model
//!   one at a time and the predictions are discarded.
//! - `Generating`: the previous symbol (first the seed's last one) is fed,
//!   the next symbol is drawn with [`sample`](crate::sampler::sample) and
//!   appended to the output. Repeats `length` times.
//! - `Done`: the output is the seed followed by `length` generated characters.
//!
//! The model must have batch size 1.

use rand::Rng;

use crate::codec::SymbolCodec;
use crate::error::{Result, TextGenError};
use crate::model::SequenceModel;
use crate::sampler::sample;
use crate::tensor::Tensor;

/// Where a generation run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Nothing has touched the model yet.
    Idle,
    /// Feeding seed symbol `next` (all but the last).
    Priming {
        /// Index of the next seed symbol to feed.
        next: usize,
    },
    /// Sampling; `produced` characters have been appended so far.
    Generating {
        /// Characters generated so far.
        produced: usize,
    },
    /// Output is complete.
    Done,
}

/// One generation run over a borrowed model.
pub struct Generator<'a, M, R> {
    model: &'a mut M,
    codec: &'a SymbolCodec,
    rng: &'a mut R,
    seed_ids: Vec<usize>,
    length: usize,
    top_n: usize,
    state: GenerationState,
    last_id: usize,
    text: String,
}

impl<'a, M: SequenceModel, R: Rng> Generator<'a, M, R> {
    /// Prepares a run. The model is not touched until the first [`step`](Self::step).
    ///
    /// # Errors
    /// `Range` for an empty seed, `Config` for a zero `top_n`,
    /// `Inference` when the model's batch size is not 1.
    pub fn new(
        model: &'a mut M,
        codec: &'a SymbolCodec,
        rng: &'a mut R,
        seed: &str,
        length: usize,
        top_n: usize,
    ) -> Result<Self> {
        if seed.is_empty() {
            return Err(TextGenError::Range("generation needs a non-empty seed".into()));
        }
        if top_n == 0 {
            return Err(TextGenError::Config("top_n must be at least 1".into()));
        }
        if model.batch_size() != 1 {
            return Err(TextGenError::Inference(format!(
                "generation needs a model with batch size 1, got {}",
                model.batch_size()
            )));
        }
        let seed_ids = codec.encode(seed);
        let mut text = String::with_capacity(seed.len() + length);
        text.push_str(seed);
        Ok(Self {
            model,
            codec,
            rng,
            seed_ids,
            length,
            top_n,
            state: GenerationState::Idle,
            last_id: 0,
            text,
        })
    }

    /// Current state.
    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Text produced so far, seed included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Performs one transition. Stepping in `Done` is a no-op.
    pub fn step(&mut self) -> Result<GenerationState> {
        self.state = match self.state {
            GenerationState::Idle => {
                self.model.reset_state();
                GenerationState::Priming { next: 0 }
            }
            GenerationState::Priming { next } if next + 1 < self.seed_ids.len() => {
                self.predict(self.seed_ids[next])?; // primes state only
                GenerationState::Priming { next: next + 1 }
            }
            GenerationState::Priming { next } => {
                self.last_id = self.seed_ids[next];
                self.after_generated(0)
            }
            GenerationState::Generating { produced } => {
                let probs = self.predict(self.last_id)?;
                let id = sample(&mut *self.rng, &probs, self.top_n)?;
                self.text.push(self.codec.decode_id(id)?);
                self.last_id = id;
                self.after_generated(produced + 1)
            }
            GenerationState::Done => GenerationState::Done,
        };
        Ok(self.state)
    }

    /// Steps until `Done` and returns the full text.
    pub fn run(mut self) -> Result<String> {
        while self.step()? != GenerationState::Done {}
        log::info!("generated text: {}", self.text);
        Ok(self.text)
    }

    fn after_generated(&self, produced: usize) -> GenerationState {
        if produced == self.length {
            GenerationState::Done
        } else {
            GenerationState::Generating { produced }
        }
    }

    /// Feeds one id and returns the model's next-symbol distribution.
    fn predict(&mut self, id: usize) -> Result<Vec<f32>> {
        let input = Tensor::raw(&[1, 1], vec![id])?;
        let output = self.model.predict_step(&input).map_err(|e| match e {
            TextGenError::Inference(_) => e,
            other => TextGenError::Inference(format!("model step failed: {other}")),
        })?;
        let vocab_size = self.model.vocab_size();
        if output.shape() != [1, 1, vocab_size] {
            return Err(TextGenError::Inference(format!(
                "expected prediction shape [1, 1, {}], got {:?}",
                vocab_size,
                output.shape()
            )));
        }
        Ok(output.into_blob())
    }
}

/// Generates `length` characters after `seed` and returns seed plus generated text.
///
/// # Errors
/// `Range` for an empty seed. Model failures surface as `Inference`,
/// sampling failures as `DegenerateDistribution`, out-of-vocabulary
/// predictions as `Decode`.
pub fn generate<M: SequenceModel, R: Rng>(
    model: &mut M,
    codec: &SymbolCodec,
    rng: &mut R,
    seed: &str,
    length: usize,
    top_n: usize,
) -> Result<String> {
    log::info!("generating with seed: {:?}", seed);
    Generator::new(model, codec, rng, seed, length, top_n)?.run()
}
