use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4, Axis};
use serde::{Deserialize, Serialize};

use crate::dataloader::data_batch::LoadedBatch;
use crate::dataloader::error::{PipelineError, Result};

use super::activation::softmax;
use super::features::{FeatureScaler, PooledColour};
use super::trainer::{train_loop, Classifier, ModelTrainer, TrainingHistory, TrainingOptions};

pub const DEFAULT_LEARNING_RATE: f32 = 0.5;

/// Two-class softmax regression, `logits = x W + b`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LinearSoftmax {
    /// `(features, 2)`
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearSoftmax {
    fn zeros(inputs: usize) -> Self {
        LinearSoftmax {
            weights: Array2::zeros((inputs, 2)),
            bias: Array1::zeros(2),
        }
    }
}

impl Classifier for LinearSoftmax {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        softmax(&(x.dot(&self.weights) + &self.bias))
    }

    fn train_step(&mut self, x: &Array2<f32>, y: &Array2<f32>, learning_rate: f32) -> Array2<f32> {
        let probs = self.forward(x);
        let n = x.nrows().max(1) as f32;
        let d_logits = (&probs - y) / n;
        let d_weights = x.t().dot(&d_logits);
        let d_bias = d_logits.sum_axis(Axis(0));
        self.weights.scaled_add(-learning_rate, &d_weights);
        self.bias.scaled_add(-learning_rate, &d_bias);
        probs
    }
}

#[derive(Serialize, Deserialize)]
struct SavedLogistic {
    name: String,
    features: PooledColour,
    scaler: FeatureScaler,
    classifier: LinearSoftmax,
}

/// Baseline: softmax regression over pooled colour features.
pub struct LogisticTrainer {
    name: String,
    options: TrainingOptions,
    features: PooledColour,
    fitted: Option<(FeatureScaler, LinearSoftmax)>,
}

impl LogisticTrainer {
    pub fn new(name: &str, options: TrainingOptions) -> Self {
        LogisticTrainer {
            name: name.to_string(),
            options,
            features: PooledColour::default(),
            fitted: None,
        }
    }

    pub fn load(path: &Path, options: TrainingOptions) -> Result<Self> {
        let saved: SavedLogistic = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if saved.classifier.weights.nrows() != saved.features.len() {
            return Err(PipelineError::TrainerError {
                model: saved.name,
                reason: format!(
                    "weights expect {} features but the extractor yields {}",
                    saved.classifier.weights.nrows(),
                    saved.features.len()
                ),
            });
        }
        Ok(LogisticTrainer {
            name: saved.name,
            options,
            features: saved.features,
            fitted: Some((saved.scaler, saved.classifier)),
        })
    }

    fn not_fitted(&self) -> PipelineError {
        PipelineError::TrainerError {
            model: self.name.clone(),
            reason: "model has not been fitted".to_string(),
        }
    }
}

impl ModelTrainer for LogisticTrainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, train: Arc<LoadedBatch>, val: &LoadedBatch) -> Result<TrainingHistory> {
        train.ensure_non_empty("train")?;
        val.ensure_non_empty("validation")?;

        let scaler = FeatureScaler::fit(&self.features.extract(&train.images)?);
        let mut classifier = LinearSoftmax::zeros(self.features.len());
        let history = train_loop(
            &self.name,
            &mut classifier,
            &self.features,
            &scaler,
            train,
            val,
            &self.options,
        )?;
        self.fitted = Some((scaler, classifier));
        Ok(history)
    }

    fn predict_proba(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let (scaler, classifier) = self.fitted.as_ref().ok_or_else(|| self.not_fitted())?;
        let x = scaler.transform(&self.features.extract(images)?);
        Ok(classifier.forward(&x))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let (scaler, classifier) = self.fitted.as_ref().ok_or_else(|| self.not_fitted())?;
        let saved = SavedLogistic {
            name: self.name.clone(),
            features: self.features,
            scaler: scaler.clone(),
            classifier: classifier.clone(),
        };
        serde_json::to_writer(BufWriter::new(File::create(path)?), &saved)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataloader::data_batch::{one_hot, PixelScale};
    use crate::dataloader::sample::Label;
    use std::path::PathBuf;

    /// Cataract images are bright and flat, normal ones dark with a bright
    /// left half.
    pub(crate) fn synthetic_batch(n: usize, offset: usize) -> LoadedBatch {
        let labels: Vec<Label> = (0..n)
            .map(|i| if (i + offset) % 2 == 0 { Label::Normal } else { Label::Cataract })
            .collect();
        let images = Array4::from_shape_fn((n, 8, 8, 3), |(i, _, x, c)| {
            let jitter = ((i * 7 + x * 3 + c) % 5) as f32 * 0.01;
            match labels[i] {
                Label::Cataract => 0.75 + jitter,
                Label::Normal if x < 4 => 0.5 + jitter,
                Label::Normal => 0.1 + jitter,
            }
        });
        LoadedBatch {
            images,
            labels: one_hot(&labels),
            paths: (0..n).map(|i| PathBuf::from(format!("{i}.png"))).collect(),
            scale: PixelScale::Unit,
        }
    }

    fn options() -> TrainingOptions {
        TrainingOptions {
            epochs: 40,
            patience: 10,
            batch_size: 8,
            prefetch: 2,
            seed: 42,
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }

    #[test]
    fn separates_synthetic_classes() {
        let mut model = LogisticTrainer::new("logistic", options());
        let history = model
            .fit(Arc::new(synthetic_batch(40, 0)), &synthetic_batch(12, 1))
            .unwrap();
        assert!(!history.epochs.is_empty());
        let first = &history.epochs[0];
        assert!(history.best().unwrap().val_loss < first.val_loss);

        let test = synthetic_batch(10, 0);
        let probs = model.predict_proba(&test.images).unwrap();
        assert_eq!(probs.dim(), (10, 2));
        for (row, label) in probs.outer_iter().zip(test.class_labels()) {
            assert!((row.sum() - 1.0).abs() < 1e-5);
            assert_eq!(row[1] > 0.5, label == Label::Cataract);
        }
    }

    #[test]
    fn predicting_before_fit_fails() {
        let model = LogisticTrainer::new("logistic", options());
        let err = model.predict_proba(&synthetic_batch(2, 0).images).unwrap_err();
        assert!(matches!(err, PipelineError::TrainerError { .. }));
    }

    #[test]
    fn saved_weights_reload_to_same_predictions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logistic.json");

        let mut model = LogisticTrainer::new("logistic", options());
        model.fit(Arc::new(synthetic_batch(20, 0)), &synthetic_batch(6, 1)).unwrap();
        model.save(&path).unwrap();

        let reloaded = LogisticTrainer::load(&path, options()).unwrap();
        assert_eq!(reloaded.name(), "logistic");
        let images = synthetic_batch(4, 0).images;
        assert_eq!(
            model.predict_proba(&images).unwrap(),
            reloaded.predict_proba(&images).unwrap()
        );
    }
}
