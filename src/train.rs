//! Epoch-driven training loop over a [`BatchSource`].

use std::time::{Duration, Instant};

use crate::batch::BatchSource;
use crate::error::{Result, TextGenError};
use crate::model::{transfer_weights, SequenceModel};

// --- Logs ---

/// Summary of one finished epoch. Epochs are numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochLogs {
    /// Epoch number, starting at 1.
    pub epoch: usize,
    /// Wall time of the epoch, validation included.
    pub duration: Duration,
    /// Mean training loss over the epoch's steps.
    pub loss: f32,
    /// Mean validation loss, when a validation stream is configured.
    pub val_loss: Option<f32>,
}

/// Summary of a whole `fit` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainLogs {
    /// Per-epoch summaries in order.
    pub epochs: Vec<EpochLogs>,
    /// Total wall time.
    pub duration: Duration,
}

impl TrainLogs {
    /// Summary of the last finished epoch.
    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }
}

// --- Hooks ---

/// Training hooks. Every method defaults to doing nothing; an error aborts `fit`.
pub trait Callback<M> {
    /// Called once before the first epoch.
    fn on_train_begin(&mut self, _model: &M) -> Result<()> {
        Ok(())
    }

    /// Called before each epoch with its 1-based number.
    fn on_epoch_begin(&mut self, _epoch: usize, _model: &M) -> Result<()> {
        Ok(())
    }

    /// Called after each epoch, validation included.
    fn on_epoch_end(&mut self, _logs: &EpochLogs, _model: &M) -> Result<()> {
        Ok(())
    }

    /// Called once after the last epoch.
    fn on_train_end(&mut self, _logs: &TrainLogs, _model: &M) -> Result<()> {
        Ok(())
    }
}

/// Held-out stream scored after every epoch.
///
/// `model` is a separate instance that receives the training weights before
/// scoring, so validation never disturbs the training model's recurrent state.
pub struct Validation<'a, M> {
    /// Validation batches.
    pub source: &'a mut dyn BatchSource,
    /// Batches scored per epoch.
    pub steps: usize,
    /// Instance used for scoring; same batch size as the stream.
    pub model: &'a mut M,
}

// --- Driver ---

/// Trains `model` for `num_epochs` epochs of `steps_per_epoch` batches each.
///
/// Recurrent state is reset once before training and again whenever the
/// source flags `reset_state`. Any model, source or callback error stops
/// training and is returned as is.
pub fn fit<M: SequenceModel>(
    model: &mut M,
    train: &mut dyn BatchSource,
    steps_per_epoch: usize,
    num_epochs: usize,
    mut validation: Option<Validation<'_, M>>,
    callbacks: &mut [&mut dyn Callback<M>],
) -> Result<TrainLogs> {
    if steps_per_epoch == 0 {
        return Err(TextGenError::Config("steps_per_epoch must be positive".into()));
    }
    if let Some(v) = &validation {
        if v.steps == 0 {
            return Err(TextGenError::Config("validation steps must be positive".into()));
        }
    }

    log::info!(
        "training for {} epochs of {} steps{}",
        num_epochs,
        steps_per_epoch,
        validation
            .as_ref()
            .map(|v| format!(", validating on {} steps", v.steps))
            .unwrap_or_default()
    );

    let start = Instant::now();
    let mut logs = TrainLogs::default();

    model.reset_state();
    if let Some(v) = validation.as_mut() {
        v.model.reset_state();
    }
    for callback in callbacks.iter_mut() {
        callback.on_train_begin(model)?;
    }

    for epoch in 1..=num_epochs {
        for callback in callbacks.iter_mut() {
            callback.on_epoch_begin(epoch, model)?;
        }
        let epoch_start = Instant::now();

        let mut total_loss = 0.0;
        for _ in 0..steps_per_epoch {
            let sourced = train.pull()?;
            if sourced.reset_state {
                log::debug!("source requested a state reset");
                model.reset_state();
            }
            total_loss += model.train_batch(&sourced.batch)?;
        }
        let loss = total_loss / steps_per_epoch as f32;

        let val_loss = match validation.as_mut() {
            Some(v) => Some(evaluate(model, v)?),
            None => None,
        };

        let epoch_logs = EpochLogs {
            epoch,
            duration: epoch_start.elapsed(),
            loss,
            val_loss,
        };
        match epoch_logs.val_loss {
            Some(val_loss) => log::info!(
                "epoch {}/{}: loss {:.4}, val_loss {:.4} ({:.2?})",
                epoch,
                num_epochs,
                loss,
                val_loss,
                epoch_logs.duration
            ),
            None => log::info!(
                "epoch {}/{}: loss {:.4} ({:.2?})",
                epoch,
                num_epochs,
                loss,
                epoch_logs.duration
            ),
        }

        for callback in callbacks.iter_mut() {
            callback.on_epoch_end(&epoch_logs, model)?;
        }
        logs.epochs.push(epoch_logs);
    }

    logs.duration = start.elapsed();
    log::info!("training finished in {:.2?}", logs.duration);
    for callback in callbacks.iter_mut() {
        callback.on_train_end(&logs, model)?;
    }
    Ok(logs)
}

/// Mean validation loss with the current training weights.
fn evaluate<M: SequenceModel>(model: &M, validation: &mut Validation<'_, M>) -> Result<f32> {
    transfer_weights(model, validation.model)?;
    let mut total = 0.0;
    for _ in 0..validation.steps {
        let sourced = validation.source.pull()?;
        if sourced.reset_state {
            validation.model.reset_state();
        }
        total += validation.model.evaluate_batch(&sourced.batch)?;
    }
    Ok(total / validation.steps as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, BatchTensor, SourcedBatch};
    use crate::generate::tests::ScriptedModel;
    use crate::tensor::Tensor;

    /// Yields tiny batches and flags a reset every `reset_every` pulls.
    struct FlaggedSource {
        pulls: usize,
        reset_every: usize,
    }

    impl BatchSource for FlaggedSource {
        fn pull(&mut self) -> Result<SourcedBatch> {
            let reset_state = self.reset_every > 0 && self.pulls % self.reset_every == 0;
            self.pulls += 1;
            let ids = Tensor::raw(&[1, 2], vec![1, 2])?;
            Ok(SourcedBatch {
                batch: Batch {
                    inputs: BatchTensor::Ids(ids.clone()),
                    targets: BatchTensor::Ids(ids),
                },
                reset_state,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        fail_at_epoch: Option<usize>,
    }

    impl Callback<ScriptedModel> for Recorder {
        fn on_train_begin(&mut self, _model: &ScriptedModel) -> Result<()> {
            self.events.push("begin".into());
            Ok(())
        }

        fn on_epoch_begin(&mut self, epoch: usize, _model: &ScriptedModel) -> Result<()> {
            self.events.push(format!("epoch_begin {epoch}"));
            Ok(())
        }

        fn on_epoch_end(&mut self, logs: &EpochLogs, _model: &ScriptedModel) -> Result<()> {
            if self.fail_at_epoch == Some(logs.epoch) {
                return Err(TextGenError::Inference("callback failed".into()));
            }
            self.events.push(format!("epoch_end {}", logs.epoch));
            Ok(())
        }

        fn on_train_end(&mut self, logs: &TrainLogs, _model: &ScriptedModel) -> Result<()> {
            self.events.push(format!("end {}", logs.epochs.len()));
            Ok(())
        }
    }

    #[test]
    fn runs_every_step_and_hook_in_order() {
        let mut model = ScriptedModel::new(1);
        let mut source = FlaggedSource { pulls: 0, reset_every: 0 };
        let mut recorder = Recorder::default();

        let logs = fit(&mut model, &mut source, 3, 2, None, &mut [&mut recorder]).unwrap();

        assert_eq!(source.pulls, 6);
        assert_eq!(model.get_weights()[0].blob()[0], 6.0);
        assert_eq!(logs.epochs.len(), 2);
        assert_eq!(logs.last().unwrap().loss, 1.0);
        assert_eq!(logs.last().unwrap().val_loss, None);
        assert_eq!(
            recorder.events,
            vec!["begin", "epoch_begin 1", "epoch_end 1", "epoch_begin 2", "epoch_end 2", "end 2"]
        );
    }

    #[test]
    fn resets_state_at_start_and_when_flagged() {
        let mut model = ScriptedModel::new(1);
        let mut source = FlaggedSource { pulls: 0, reset_every: 4 };
        fit(&mut model, &mut source, 4, 3, None, &mut []).unwrap();
        // one initial reset plus pulls 0, 4 and 8
        assert_eq!(model.resets, 4);
    }

    #[test]
    fn validation_uses_its_own_instance() {
        let mut model = ScriptedModel::new(1);
        let mut validator = ScriptedModel::new(1);
        let mut source = FlaggedSource { pulls: 0, reset_every: 0 };
        let mut held_out = FlaggedSource { pulls: 0, reset_every: 0 };

        let logs = fit(
            &mut model,
            &mut source,
            2,
            2,
            Some(Validation {
                source: &mut held_out,
                steps: 5,
                model: &mut validator,
            }),
            &mut [],
        )
        .unwrap();

        assert_eq!(held_out.pulls, 10);
        assert_eq!(logs.epochs[0].val_loss, Some(2.0));
        assert_eq!(validator.get_weights(), model.get_weights());
        assert_eq!(model.resets, 1);
        assert_eq!(validator.resets, 1);
    }

    #[test]
    fn callback_errors_stop_training() {
        let mut model = ScriptedModel::new(1);
        let mut source = FlaggedSource { pulls: 0, reset_every: 0 };
        let mut recorder = Recorder {
            fail_at_epoch: Some(1),
            ..Recorder::default()
        };
        let result = fit(&mut model, &mut source, 2, 5, None, &mut [&mut recorder]);
        assert!(matches!(result, Err(TextGenError::Inference(_))));
        assert_eq!(source.pulls, 2);
    }

    #[test]
    fn zero_steps_are_rejected() {
        let mut model = ScriptedModel::new(1);
        let mut source = FlaggedSource { pulls: 0, reset_every: 0 };
        assert!(matches!(
            fit(&mut model, &mut source, 0, 1, None, &mut []),
            Err(TextGenError::Config(_))
        ));
    }
}
