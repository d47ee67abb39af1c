// Two-model weighted ensemble and the three-way verdict reported for a
// single fundus photograph.

use std::fmt;
use std::path::Path;

use ndarray::{Array2, Array4, ArrayView1, Axis};

use crate::dataloader::error::{PipelineError, Result};
use crate::dataloader::image_loader::ImageLoader;
use crate::model::trainer::ModelTrainer;

pub const FIRST_WEIGHT: f32 = 0.4;
pub const SECOND_WEIGHT: f32 = 0.6;
/// Below this the verdict is `Uncertain` whatever the winning class.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Extensions accepted for single-image inference.
pub const ACCEPTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Positive,
    Negative,
    Uncertain,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Positive => write!(f, "positive"),
            Verdict::Negative => write!(f, "negative"),
            Verdict::Uncertain => write!(f, "uncertain"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnosis {
    pub verdict: Verdict,
    /// Largest combined class probability.
    pub confidence: f32,
    /// `[normal, cataract]`
    pub probabilities: [f32; 2],
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verdict {
            Verdict::Positive => write!(f, "cataract detected ({:.1}% confidence)", self.confidence * 100.0),
            Verdict::Negative => write!(f, "no cataract detected ({:.1}% confidence)", self.confidence * 100.0),
            Verdict::Uncertain => write!(
                f,
                "uncertain ({:.1}% confidence), retake the photograph or refer to an ophthalmologist",
                self.confidence * 100.0
            ),
        }
    }
}

/// Ties go to class 0, which can only happen below the confidence threshold.
pub fn verdict(probabilities: ArrayView1<f32>) -> Diagnosis {
    let (normal, cataract) = (probabilities[0], probabilities[1]);
    let confidence = normal.max(cataract);
    let verdict = if confidence < CONFIDENCE_THRESHOLD {
        Verdict::Uncertain
    } else if cataract > normal {
        Verdict::Positive
    } else {
        Verdict::Negative
    };
    Diagnosis {
        verdict,
        confidence,
        probabilities: [normal, cataract],
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WeightedEnsemble {
    pub weights: [f32; 2],
}

impl Default for WeightedEnsemble {
    fn default() -> Self {
        WeightedEnsemble {
            weights: [FIRST_WEIGHT, SECOND_WEIGHT],
        }
    }
}

impl WeightedEnsemble {
    pub fn combine(&self, first: &Array2<f32>, second: &Array2<f32>) -> Result<Array2<f32>> {
        if first.dim() != second.dim() {
            return Err(PipelineError::LengthMismatch {
                expected: first.nrows(),
                actual: second.nrows(),
            });
        }
        Ok(first * self.weights[0] + second * self.weights[1])
    }

    pub fn predict_proba(&self, models: [&dyn ModelTrainer; 2], images: &Array4<f32>) -> Result<Array2<f32>> {
        let first = models[0].predict_proba(images)?;
        let second = models[1].predict_proba(images)?;
        self.combine(&first, &second)
    }

    /// Decode, resize and scale one photograph, then score it with both
    /// models.
    pub fn diagnose_image(&self, models: [&dyn ModelTrainer; 2], loader: &ImageLoader, path: &Path) -> Result<Diagnosis> {
        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !accepted {
            return Err(PipelineError::UnreadableImage {
                path: path.to_path_buf(),
                reason: format!("expected one of {}", ACCEPTED_EXTENSIONS.join(", ")),
            });
        }

        let image = loader.preprocess(path)?.insert_axis(Axis(0));
        let combined = self.predict_proba(models, &image)?;
        let diagnosis = verdict(combined.row(0));
        tracing::info!(
            path = %path.display(),
            verdict = %diagnosis.verdict,
            confidence = diagnosis.confidence,
            "diagnosed image"
        );
        Ok(diagnosis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn verdict_thresholds() {
        let cases = [
            ([0.45, 0.55], Verdict::Uncertain),
            ([0.08, 0.92], Verdict::Positive),
            ([0.91, 0.09], Verdict::Negative),
            ([0.35, 0.65], Verdict::Positive),
            ([0.6, 0.4], Verdict::Negative),
            ([0.5, 0.5], Verdict::Uncertain),
        ];
        for (probs, expected) in cases {
            let d = verdict(ArrayView1::from(&probs));
            assert_eq!(d.verdict, expected, "{probs:?}");
            assert_eq!(d.confidence, probs[0].max(probs[1]));
        }
    }

    #[test]
    fn combination_is_weighted() {
        let ensemble = WeightedEnsemble::default();
        let first = array![[1.0, 0.0], [0.2, 0.8]];
        let second = array![[0.0, 1.0], [0.2, 0.8]];
        let combined = ensemble.combine(&first, &second).unwrap();
        assert!((combined[[0, 0]] - 0.4).abs() < 1e-6);
        assert!((combined[[0, 1]] - 0.6).abs() < 1e-6);
        assert!((combined[[1, 1]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn mismatched_predictions_are_rejected() {
        let ensemble = WeightedEnsemble::default();
        let err = ensemble
            .combine(&Array2::zeros((3, 2)), &Array2::zeros((2, 2)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::LengthMismatch { expected: 3, actual: 2 }));
    }

    struct Fixed(Array2<f32>);

    impl ModelTrainer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fit(
            &mut self,
            _train: std::sync::Arc<crate::dataloader::data_batch::LoadedBatch>,
            _val: &crate::dataloader::data_batch::LoadedBatch,
        ) -> Result<crate::model::trainer::TrainingHistory> {
            Ok(Default::default())
        }

        fn predict_proba(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
            let n = images.len_of(Axis(0));
            Ok(self.0.broadcast((n, 2)).map(|v| v.to_owned()).unwrap_or_default())
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn diagnoses_a_single_photograph() {
        let tmp = tempfile::tempdir().unwrap();
        let photo = tmp.path().join("eye.png");
        image::RgbImage::from_pixel(10, 10, image::Rgb([200, 40, 40]))
            .save_with_format(&photo, image::ImageFormat::Png)
            .unwrap();

        let loader = ImageLoader::new(8, 6, 1).unwrap();
        let cnn = Fixed(array![[0.3, 0.7]]);
        let effnet = Fixed(array![[0.1, 0.9]]);
        let d = WeightedEnsemble::default()
            .diagnose_image([&cnn, &effnet], &loader, &photo)
            .unwrap();
        assert_eq!(d.verdict, Verdict::Positive);
        assert!((d.confidence - 0.82).abs() < 1e-6);

        let gif = tmp.path().join("eye.gif");
        assert!(matches!(
            WeightedEnsemble::default().diagnose_image([&cnn, &effnet], &loader, &gif),
            Err(PipelineError::UnreadableImage { .. })
        ));
    }
}
