use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array4, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataloader::data_batch::LoadedBatch;
use crate::dataloader::error::{PipelineError, Result};

use super::activation::{mish, mish_derivative, softmax};
use super::features::{FeatureScaler, PooledColour};
use super::trainer::{train_loop, Classifier, ModelTrainer, TrainingHistory, TrainingOptions};

pub const DEFAULT_HIDDEN: usize = 32;
pub const DEFAULT_LEARNING_RATE: f32 = 0.1;

#[derive(Clone, Copy, Debug)]
pub enum WeightInit {
    /// Normal with std sqrt(2 / fan_in)
    He,
    /// Uniform in +-sqrt(6 / (fan_in + fan_out))
    Xavier,
}

impl WeightInit {
    // Box-Muller
    fn normal_sample(rng: &mut impl Rng, std_dev: f32) -> f32 {
        let uniform = Uniform::new(f32::EPSILON, 1.0);
        let u1 = uniform.sample(rng);
        let u2 = uniform.sample(rng);
        std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// `(fan_in, fan_out)` matrix.
    pub fn init(&self, fan_in: usize, fan_out: usize, rng: &mut impl Rng) -> Array2<f32> {
        match self {
            WeightInit::He => {
                let std_dev = (2.0 / fan_in.max(1) as f32).sqrt();
                Array2::from_shape_simple_fn((fan_in, fan_out), || Self::normal_sample(&mut *rng, std_dev))
            }
            WeightInit::Xavier => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                let dist = Uniform::new_inclusive(-limit, limit);
                Array2::from_shape_simple_fn((fan_in, fan_out), || dist.sample(&mut *rng))
            }
        }
    }
}

/// `softmax(mish(x W1 + b1) W2 + b2)`
#[derive(Clone, Debug, Serialize, Deserialize)]
struct HiddenLayerNet {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl HiddenLayerNet {
    fn new(inputs: usize, hidden: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        HiddenLayerNet {
            w1: WeightInit::He.init(inputs, hidden, &mut rng),
            b1: Array1::zeros(hidden),
            w2: WeightInit::Xavier.init(hidden, 2, &mut rng),
            b2: Array1::zeros(2),
        }
    }

    fn inputs(&self) -> usize {
        self.w1.nrows()
    }

    fn pre_activation(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.w1) + &self.b1
    }

    fn head(&self, hidden: &Array2<f32>) -> Array2<f32> {
        softmax(&(hidden.dot(&self.w2) + &self.b2))
    }
}

impl Classifier for HiddenLayerNet {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.head(&self.pre_activation(x).mapv(mish))
    }

    fn train_step(&mut self, x: &Array2<f32>, y: &Array2<f32>, learning_rate: f32) -> Array2<f32> {
        let pre = self.pre_activation(x);
        let hidden = pre.mapv(mish);
        let probs = self.head(&hidden);

        let n = x.nrows().max(1) as f32;
        let d_logits = (&probs - y) / n;
        let d_w2 = hidden.t().dot(&d_logits);
        let d_b2 = d_logits.sum_axis(Axis(0));

        let d_hidden = d_logits.dot(&self.w2.t());
        let d_pre = d_hidden * pre.mapv(mish_derivative);
        let d_w1 = x.t().dot(&d_pre);
        let d_b1 = d_pre.sum_axis(Axis(0));

        self.w2.scaled_add(-learning_rate, &d_w2);
        self.b2.scaled_add(-learning_rate, &d_b2);
        self.w1.scaled_add(-learning_rate, &d_w1);
        self.b1.scaled_add(-learning_rate, &d_b1);
        probs
    }
}

#[derive(Serialize, Deserialize)]
struct SavedMlp {
    name: String,
    features: PooledColour,
    scaler: FeatureScaler,
    net: HiddenLayerNet,
}

/// One hidden layer with mish activation over pooled colour features.
pub struct MlpTrainer {
    name: String,
    options: TrainingOptions,
    features: PooledColour,
    hidden: usize,
    fitted: Option<(FeatureScaler, HiddenLayerNet)>,
}

impl MlpTrainer {
    pub fn new(name: &str, options: TrainingOptions) -> Self {
        MlpTrainer {
            name: name.to_string(),
            options,
            features: PooledColour::default(),
            hidden: DEFAULT_HIDDEN,
            fitted: None,
        }
    }

    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden.max(1);
        self
    }

    pub fn load(path: &Path, options: TrainingOptions) -> Result<Self> {
        let saved: SavedMlp = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if saved.net.inputs() != saved.features.len() {
            return Err(PipelineError::TrainerError {
                model: saved.name,
                reason: format!(
                    "weights expect {} features but the extractor yields {}",
                    saved.net.inputs(),
                    saved.features.len()
                ),
            });
        }
        Ok(MlpTrainer {
            name: saved.name,
            options,
            features: saved.features,
            hidden: saved.net.w1.ncols(),
            fitted: Some((saved.scaler, saved.net)),
        })
    }

    fn not_fitted(&self) -> PipelineError {
        PipelineError::TrainerError {
            model: self.name.clone(),
            reason: "model has not been fitted".to_string(),
        }
    }
}

impl ModelTrainer for MlpTrainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&mut self, train: Arc<LoadedBatch>, val: &LoadedBatch) -> Result<TrainingHistory> {
        train.ensure_non_empty("train")?;
        val.ensure_non_empty("validation")?;

        let scaler = FeatureScaler::fit(&self.features.extract(&train.images)?);
        let mut net = HiddenLayerNet::new(self.features.len(), self.hidden, self.options.seed);
        tracing::debug!(
            model = %self.name,
            inputs = self.features.len(),
            hidden = self.hidden,
            "initialised network"
        );
        let history = train_loop(&self.name, &mut net, &self.features, &scaler, train, val, &self.options)?;
        self.fitted = Some((scaler, net));
        Ok(history)
    }

    fn predict_proba(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let (scaler, net) = self.fitted.as_ref().ok_or_else(|| self.not_fitted())?;
        let x = scaler.transform(&self.features.extract(images)?);
        Ok(net.forward(&x))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let (scaler, net) = self.fitted.as_ref().ok_or_else(|| self.not_fitted())?;
        let saved = SavedMlp {
            name: self.name.clone(),
            features: self.features,
            scaler: scaler.clone(),
            net: net.clone(),
        };
        serde_json::to_writer(BufWriter::new(File::create(path)?), &saved)?;
        Ok(())
    }
}
