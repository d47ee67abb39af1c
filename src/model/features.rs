// Colour features for the built-in trainers.
//
// Each image is average pooled over a `grid_rows x grid_cols` grid, giving the
// mean R, G, B of every cell, followed by the whole-image standard deviation of
// each channel. Lens opacity shows up as a washed out, low contrast fundus, so
// coarse colour and contrast statistics carry most of the signal.

use ndarray::{s, Array1, Array2, Array4, ArrayView3, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataloader::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledColour {
    pub grid_rows: usize,
    pub grid_cols: usize,
}

impl Default for PooledColour {
    fn default() -> Self {
        PooledColour {
            grid_rows: 4,
            grid_cols: 4,
        }
    }
}

impl PooledColour {
    pub fn len(&self) -> usize {
        self.grid_rows * self.grid_cols * 3 + 3
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(n, h, w, 3)` images to `(n, self.len())` features.
    pub fn extract(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        let n = images.len_of(Axis(0));
        let rows: Vec<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|i| self.image_features(images.index_axis(Axis(0), i)))
            .collect();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((n, self.len()), flat)?)
    }

    fn image_features(&self, image: ArrayView3<f32>) -> Vec<f32> {
        let (h, w, _) = image.dim();
        let mut features = Vec::with_capacity(self.len());

        for r in 0..self.grid_rows {
            let (y0, y1) = cell_bounds(r, self.grid_rows, h);
            for c in 0..self.grid_cols {
                let (x0, x1) = cell_bounds(c, self.grid_cols, w);
                let cell = image.slice(s![y0..y1, x0..x1, ..]);
                for ch in 0..3 {
                    features.push(cell.slice(s![.., .., ch]).mean().unwrap_or(0.0));
                }
            }
        }

        for ch in 0..3 {
            let channel = image.slice(s![.., .., ch]);
            let std = if channel.is_empty() { 0.0 } else { channel.std(0.0) };
            features.push(std);
        }

        features
    }
}

fn cell_bounds(index: usize, cells: usize, extent: usize) -> (usize, usize) {
    (index * extent / cells, (index + 1) * extent / cells)
}

/// Min-max scaling fitted on training features. Constant features map to 0.5.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mins: Vec<f32>,
    pub ranges: Vec<f32>,
}

impl FeatureScaler {
    pub fn fit(features: &Array2<f32>) -> Self {
        let cols = features.ncols();
        let mut mins = vec![f32::INFINITY; cols];
        let mut maxs = vec![f32::NEG_INFINITY; cols];
        for row in features.outer_iter() {
            for (j, &v) in row.iter().enumerate() {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
        let ranges = mins
            .iter_mut()
            .zip(maxs.iter())
            .map(|(min, &max)| {
                if !min.is_finite() {
                    *min = 0.0;
                    return 0.0;
                }
                max - *min
            })
            .collect();
        FeatureScaler { mins, ranges }
    }

    pub fn transform(&self, features: &Array2<f32>) -> Array2<f32> {
        let mins = Array1::from_vec(self.mins.clone());
        let mut scaled = features - &mins;
        for (j, mut col) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let range = self.ranges[j];
            if range > 1e-10 {
                col.mapv_inplace(|v| v / range);
            } else {
                col.fill(0.5);
            }
        }
        scaled
    }
}

/// Mirror each image left to right with probability one half.
pub fn random_horizontal_flip(images: &mut Array4<f32>, rng: &mut impl Rng) {
    for i in 0..images.len_of(Axis(0)) {
        if rng.gen_bool(0.5) {
            let flipped = images.slice(s![i, .., ..;-1, ..]).to_owned();
            images.slice_mut(s![i, .., .., ..]).assign(&flipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn pooled_means_follow_cell_layout() {
        // 2x2 image, left column red, right column blue
        let mut images = Array4::zeros((1, 2, 2, 3));
        images.slice_mut(s![0, .., 0, 0]).fill(1.0);
        images.slice_mut(s![0, .., 1, 2]).fill(1.0);

        let pool = PooledColour {
            grid_rows: 1,
            grid_cols: 2,
        };
        let features = pool.extract(&images).unwrap();
        assert_eq!(features.dim(), (1, pool.len()));
        assert_eq!(features.row(0).slice(s![..6]).to_vec(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert!((features[[0, 6]] - 0.5).abs() < 1e-6);
        assert_eq!(features[[0, 7]], 0.0);
    }

    #[test]
    fn scaler_maps_training_range_to_unit() {
        let train = array![[0.0, 5.0, 2.0], [10.0, 5.0, 4.0]];
        let scaler = FeatureScaler::fit(&train);
        let scaled = scaler.transform(&array![[5.0, 5.0, 6.0]]);
        assert_eq!(scaled.row(0).to_vec(), vec![0.5, 0.5, 2.0]);
    }

    #[test]
    fn flip_mirrors_columns() {
        let mut images = Array4::from_shape_fn((16, 1, 3, 3), |(_, _, x, _)| x as f32);
        random_horizontal_flip(&mut images, &mut StdRng::seed_from_u64(1));
        let flipped = (0..16).filter(|&i| images[[i, 0, 0, 0]] == 2.0).count();
        assert!(flipped > 0 && flipped < 16);
        for i in 0..16 {
            let first = images[[i, 0, 0, 0]];
            assert_eq!(images[[i, 0, 2, 0]], 2.0 - first);
            assert_eq!(images[[i, 0, 1, 0]], 1.0);
        }
    }
}
