use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::dataloader::config::PipelineConfig;
use crate::dataloader::data_batch::LoadedBatch;
use crate::dataloader::error::Result;
use crate::dataloader::par_iter::ParallelMiniBatches;

use super::features::{random_horizontal_flip, FeatureScaler, PooledColour};

/// Anything that can be fitted on the train/validation splits and then score
/// images with `(n, 2)` class probabilities.
pub trait ModelTrainer {
    fn name(&self) -> &str;

    fn fit(&mut self, train: Arc<LoadedBatch>, val: &LoadedBatch) -> Result<TrainingHistory>;

    /// Column 1 is the cataract probability.
    fn predict_proba(&self, images: &Array4<f32>) -> Result<Array2<f32>>;

    fn save(&self, path: &Path) -> Result<()>;
}

pub const LR_REDUCE_FACTOR: f32 = 0.1;
pub const LR_REDUCE_PATIENCE: usize = 10;

#[derive(Clone, Debug)]
pub struct TrainingOptions {
    pub epochs: usize,
    /// Epochs without validation loss improvement before stopping.
    pub patience: usize,
    pub batch_size: usize,
    pub prefetch: usize,
    pub seed: u64,
    pub learning_rate: f32,
}

impl TrainingOptions {
    pub fn from_config(config: &PipelineConfig, learning_rate: f32) -> Self {
        TrainingOptions {
            epochs: config.epochs,
            patience: config.patience,
            batch_size: config.batch_size,
            prefetch: config.prefetch_count,
            seed: config.seed,
            learning_rate,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub model: String,
    pub epochs: Vec<EpochMetrics>,
    /// Index into `epochs` whose weights were kept.
    pub best_epoch: usize,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.get(self.best_epoch)
    }

    pub fn print(&self) {
        println!("\nTraining History: {}", self.model);
        println!("{:-<72}", "");
        println!(
            "{:<6} {:>10} {:>10} {:>10} {:>10} {:>12}",
            "Epoch", "Loss", "Accuracy", "Val Loss", "Val Acc", "LR"
        );
        println!("{:-<72}", "");
        for m in &self.epochs {
            let marker = if m.epoch == self.best_epoch + 1 { "*" } else { "" };
            println!(
                "{:<6} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>12.2e}{marker}",
                m.epoch, m.loss, m.accuracy, m.val_loss, m.val_accuracy, m.learning_rate
            );
        }
        println!("{:-<72}", "");
        if self.stopped_early {
            println!("Stopped early after {} epochs", self.epochs.len());
        }
        if let Some(best) = self.best() {
            println!("Restored weights from epoch {} (val loss {:.4})", best.epoch, best.val_loss);
        }
    }
}

/// A model over scaled feature rows, trained with softmax cross-entropy.
pub(crate) trait Classifier: Clone {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32>;

    /// One gradient step on the batch. Returns the probabilities computed
    /// before the update.
    fn train_step(&mut self, x: &Array2<f32>, y: &Array2<f32>, learning_rate: f32) -> Array2<f32>;
}

/// Mean categorical cross-entropy, probabilities clamped away from zero.
pub fn cross_entropy(probs: &Array2<f32>, labels: &Array2<f32>) -> f64 {
    let n = probs.nrows();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = probs
        .iter()
        .zip(labels.iter())
        .map(|(&p, &y)| -(y as f64) * (p.max(1e-7) as f64).ln())
        .sum();
    total / n as f64
}

/// Share of rows whose arg-max matches the one-hot label.
pub fn categorical_accuracy(probs: &Array2<f32>, labels: &Array2<f32>) -> f64 {
    let n = probs.nrows();
    if n == 0 {
        return 0.0;
    }
    let hits = probs
        .axis_iter(Axis(0))
        .zip(labels.axis_iter(Axis(0)))
        .filter(|(p, y)| (p[1] > p[0]) == (y[1] > y[0]))
        .count();
    hits as f64 / n as f64
}

/// Shared epoch loop: shuffled mini-batches with horizontal flips, validation
/// after every epoch, learning rate cut on plateau, early stopping. The
/// classifier is left holding the weights of the best validation epoch.
pub(crate) fn train_loop<C: Classifier>(
    name: &str,
    classifier: &mut C,
    features: &PooledColour,
    scaler: &FeatureScaler,
    train: Arc<LoadedBatch>,
    val: &LoadedBatch,
    options: &TrainingOptions,
) -> Result<TrainingHistory> {
    let val_x = scaler.transform(&features.extract(&val.images)?);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut learning_rate = options.learning_rate;

    let mut history = TrainingHistory {
        model: name.to_string(),
        ..TrainingHistory::default()
    };
    let mut best = classifier.clone();
    let mut best_loss = f64::INFINITY;
    let mut since_best = 0usize;

    for epoch in 0..options.epochs {
        let batches = Arc::clone(&train).par_iter(
            options.batch_size,
            options.prefetch,
            Some(options.seed.wrapping_add(epoch as u64)),
        );
        tracing::trace!(model = name, epoch = epoch + 1, steps = batches.steps(), "epoch started");

        let (mut loss_sum, mut hit_sum, mut seen) = (0.0, 0.0, 0usize);
        for batch in batches {
            let mut images = batch.images;
            random_horizontal_flip(&mut images, &mut rng);
            let x = scaler.transform(&features.extract(&images)?);
            let probs = classifier.train_step(&x, &batch.labels, learning_rate);
            let n = batch.labels.nrows();
            loss_sum += cross_entropy(&probs, &batch.labels) * n as f64;
            hit_sum += categorical_accuracy(&probs, &batch.labels) * n as f64;
            seen += n;
        }

        let val_probs = classifier.forward(&val_x);
        let metrics = EpochMetrics {
            epoch: epoch + 1,
            loss: loss_sum / seen.max(1) as f64,
            accuracy: hit_sum / seen.max(1) as f64,
            val_loss: cross_entropy(&val_probs, &val.labels),
            val_accuracy: categorical_accuracy(&val_probs, &val.labels),
            learning_rate,
        };
        tracing::debug!(
            model = name,
            epoch = metrics.epoch,
            loss = metrics.loss,
            val_loss = metrics.val_loss,
            val_accuracy = metrics.val_accuracy,
            "epoch finished"
        );

        if metrics.val_loss < best_loss {
            best_loss = metrics.val_loss;
            best = classifier.clone();
            history.best_epoch = epoch;
            since_best = 0;
        } else {
            since_best += 1;
        }
        history.epochs.push(metrics);

        if since_best >= options.patience {
            tracing::info!(model = name, epoch = epoch + 1, "early stopping");
            history.stopped_early = true;
            break;
        }
        if since_best > 0 && since_best % LR_REDUCE_PATIENCE == 0 {
            learning_rate *= LR_REDUCE_FACTOR;
            tracing::info!(model = name, learning_rate, "reducing learning rate");
        }
    }

    *classifier = best;
    Ok(history)
}
