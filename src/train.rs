use std::fs::File;
use std::path::Path;
use std::time::Instant;

use log::info;
use ndarray::Array1;
use ndarray_npy::NpzWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TrainingConfig;
use crate::dataset::{BatchLoader, Dataset, DatasetSplits, Order};
use crate::error::{Error, Result};
use crate::model::{argmax_rows, cross_entropy, Mode, SequenceClassifier};
use crate::optim::Adam;

/// Per-epoch losses: the last training batch and the validation mean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossTrace {
    pub train: Vec<f32>,
    pub validation: Vec<f32>,
}

impl LossTrace {
    pub fn push(&mut self, train: f32, validation: f32) {
        self.train.push(train);
        self.validation.push(validation);
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// Write both curves as `train_loss` and `validation_loss` arrays.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut npz = NpzWriter::new(file);
        npz.add_array("train_loss", &Array1::from_vec(self.train.clone()))?;
        npz.add_array("validation_loss", &Array1::from_vec(self.validation.clone()))?;
        npz.finish()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub losses: LossTrace,
    /// Test accuracy in percent, `None` for an empty test split.
    pub accuracy: Option<f64>,
}

pub fn rng_from_config(config: &TrainingConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Fixed-length training: sequential train batches, one Adam step each, then
/// the mean validation loss in evaluation mode. No early stopping.
pub fn train<R: Rng>(
    model: &mut SequenceClassifier,
    splits: &DatasetSplits,
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<LossTrace> {
    if splits.train.is_empty() {
        return Err(Error::EmptySplit("train"));
    }
    if splits.validation.is_empty() {
        return Err(Error::EmptySplit("validation"));
    }

    let train_loader = BatchLoader::new(&splits.train, config.batch_size, Order::Sequential);
    let val_loader = BatchLoader::new(&splits.validation, config.batch_size, Order::Shuffled);
    let mut optimizer = Adam::new(config.learning_rate);
    let mut trace = LossTrace::default();

    for epoch in 0..config.epochs {
        let timer = Instant::now();
        let mut last_loss = f32::NAN;

        for (b, batch) in train_loader.batches(rng)?.into_iter().enumerate() {
            let forward = model.forward_t(&batch.inputs, Mode::Train(&mut *rng));
            let (loss, grads) = model.backward(&forward, &batch.labels);
            if !loss.is_finite() {
                return Err(Error::NonFiniteLoss { epoch, batch: b });
            }
            optimizer.step(model.parameters_mut(), &grads);
            last_loss = loss;
        }

        let val_loss = validation_loss(model, &val_loader, rng)?;
        trace.push(last_loss, val_loss);

        info!(
            "Epoch {}/{} Train Loss: {:.6} Val Loss: {:.6} ({:.2}s)",
            epoch + 1,
            config.epochs,
            last_loss,
            val_loss,
            timer.elapsed().as_secs_f32()
        );
    }

    Ok(trace)
}

fn validation_loss<R: Rng>(
    model: &SequenceClassifier,
    loader: &BatchLoader<'_>,
    rng: &mut R,
) -> Result<f32> {
    let batches = loader.batches(rng)?;
    let total: f32 = batches
        .iter()
        .map(|batch| cross_entropy(&model.probabilities(&batch.inputs), &batch.labels))
        .sum();
    Ok(total / batches.len().max(1) as f32)
}

/// Accuracy in percent over shuffled batches, evaluation mode.
pub fn evaluate<R: Rng>(
    model: &SequenceClassifier,
    dataset: &Dataset,
    batch_size: usize,
    rng: &mut R,
) -> Result<Option<f64>> {
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in BatchLoader::new(dataset, batch_size, Order::Shuffled).batches(rng)? {
        let predicted = argmax_rows(&model.probabilities(&batch.inputs));
        correct += predicted
            .iter()
            .zip(&batch.labels)
            .filter(|(p, l)| p == l)
            .count();
        total += batch.len();
    }
    if total == 0 {
        Ok(None)
    } else {
        Ok(Some(100.0 * correct as f64 / total as f64))
    }
}

/// Build a fresh classifier, train it, persist it to `checkpoint` and score
/// it on the test split.
pub fn train_and_evaluate(
    splits: &DatasetSplits,
    config: &TrainingConfig,
    checkpoint: &Path,
) -> Result<(SequenceClassifier, TrainingReport)> {
    let mut rng = rng_from_config(config);
    let mut model = SequenceClassifier::from_config(config, &mut rng);

    info!(
        "Training on {} samples, validating on {}, testing on {}",
        splits.train.len(),
        splits.validation.len(),
        splits.test.len()
    );
    let losses = train(&mut model, splits, config, &mut rng)?;

    model.save(checkpoint)?;
    info!("Model saved to {}", checkpoint.display());

    let accuracy = evaluate(&model, &splits.test, config.batch_size, &mut rng)?;
    if let Some(accuracy) = accuracy {
        info!("Accuracy: {accuracy}%");
    }

    Ok((model, TrainingReport { losses, accuracy }))
}
