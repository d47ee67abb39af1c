use std::path::PathBuf;

use ndarray::{Array2, Array4, ArrayView1, Axis};

use super::error::{PipelineError, Result};
use super::sample::Label;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelScale {
    /// 0..=255 as decoded
    Raw,
    /// 0.0..=1.0
    Unit,
}

/// Decoded images of one subset with their one-hot labels. Row `i` of
/// `labels` and `paths[i]` belong to image `i`.
#[derive(Clone, Debug)]
pub struct LoadedBatch {
    /// Shape `(n, height, width, 3)`, RGB.
    pub images: Array4<f32>,
    /// Shape `(n, 2)`, columns `[normal, cataract]`.
    pub labels: Array2<f32>,
    pub paths: Vec<PathBuf>,
    pub scale: PixelScale,
}

impl LoadedBatch {
    pub fn empty(height: usize, width: usize) -> Self {
        LoadedBatch {
            images: Array4::zeros((0, height, width, 3)),
            labels: Array2::zeros((0, 2)),
            paths: Vec::new(),
            scale: PixelScale::Raw,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(n, height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.images.dim()
    }

    /// Divide every pixel by 255. Applying it twice is a no-op.
    pub fn normalize(mut self) -> Self {
        if self.scale == PixelScale::Raw {
            self.images.mapv_inplace(|v| v / 255.0);
            self.scale = PixelScale::Unit;
        }
        self
    }

    pub fn class_labels(&self) -> Vec<Label> {
        self.labels
            .outer_iter()
            .map(|row| if row[1] > row[0] { Label::Cataract } else { Label::Normal })
            .collect()
    }

    /// Training and evaluation cannot run on nothing.
    pub fn ensure_non_empty(&self, subset: &str) -> Result<&Self> {
        if self.is_empty() {
            return Err(PipelineError::EmptyDataset(subset.to_string()));
        }
        Ok(self)
    }

    /// Copy out the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> (Array4<f32>, Array2<f32>) {
        (
            self.images.select(Axis(0), indices),
            self.labels.select(Axis(0), indices),
        )
    }
}

pub fn one_hot(labels: &[Label]) -> Array2<f32> {
    let mut encoded = Array2::zeros((labels.len(), 2));
    for (mut row, label) in encoded.outer_iter_mut().zip(labels) {
        row.assign(&ArrayView1::from(&label.one_hot()));
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(values: &[f32], labels: &[Label]) -> LoadedBatch {
        let n = labels.len();
        let images = Array4::from_shape_vec((n, 1, 1, 3), values.to_vec()).unwrap();
        LoadedBatch {
            images,
            labels: one_hot(labels),
            paths: (0..n).map(|i| PathBuf::from(format!("{i}.jpg"))).collect(),
            scale: PixelScale::Raw,
        }
    }

    #[test]
    fn one_hot_encoding() {
        let encoded = one_hot(&[Label::Normal, Label::Cataract, Label::Cataract]);
        assert_eq!(encoded.dim(), (3, 2));
        assert_eq!(encoded.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(encoded.row(2).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn normalize_scales_into_unit_range_once() {
        let batch = batch_of(&[0.0, 127.5, 255.0, 255.0, 0.0, 51.0], &[Label::Normal, Label::Cataract]);
        let normalized = batch.normalize();
        assert!(normalized.images.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(normalized.images[[0, 0, 0, 2]], 1.0);
        assert_eq!(normalized.images[[1, 0, 0, 2]], 0.2);

        let again = normalized.clone().normalize();
        assert_eq!(again.images, normalized.images);
    }

    #[test]
    fn class_labels_round_trip_through_one_hot() {
        let labels = vec![Label::Cataract, Label::Normal];
        let batch = batch_of(&[0.0; 6], &labels);
        assert_eq!(batch.class_labels(), labels);
    }

    #[test]
    fn empty_batch_is_rejected_downstream() {
        let batch = LoadedBatch::empty(192, 256);
        assert_eq!(batch.shape(), (0, 192, 256, 3));
        assert!(matches!(batch.ensure_non_empty("test"), Err(PipelineError::EmptyDataset(name)) if name == "test"));
    }

    #[test]
    fn select_keeps_rows_aligned() {
        let batch = batch_of(&[1.0, 1.0, 1.0, 2.0, 2.0, 2.0], &[Label::Normal, Label::Cataract]);
        let (images, labels) = batch.select(&[1, 0]);
        assert_eq!(images[[0, 0, 0, 0]], 2.0);
        assert_eq!(labels.row(0).to_vec(), vec![0.0, 1.0]);
    }
}
