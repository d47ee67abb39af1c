use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};
use rayon::prelude::*;

use super::config::PipelineConfig;
use super::data_batch::{one_hot, LoadedBatch, PixelScale};
use super::error::{PipelineError, Result};
use super::sample::{Label, Sample, Subset};

/// What the loader dropped. Entries are `PipelineError::UnreadableImage`.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub requested: usize,
    pub loaded: usize,
    pub skipped: Vec<PipelineError>,
}

pub struct ImageLoader {
    width: u32,
    height: u32,
    filter: FilterType,
    pool: rayon::ThreadPool,
}

impl ImageLoader {
    pub fn new(width: u32, height: u32, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("image-loader-{i}"))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("image loader thread pool: {e}")))?;

        Ok(ImageLoader {
            width,
            height,
            // Bilinear, deterministic
            filter: FilterType::Triangle,
            pool,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.image_width, config.image_height, config.threads)
    }

    /// Decode every sample of `subset`. Unreadable or missing files are
    /// skipped with a warning, so the batch can be shorter than the subset.
    /// Pixels stay in 0..=255 until [`LoadedBatch::normalize`].
    pub fn load(&self, subset: &Subset) -> Result<(LoadedBatch, LoadReport)> {
        // Decoding is parallel but collect() keeps subset order
        let decoded: Vec<(&Sample, std::result::Result<(PathBuf, RgbImage), PipelineError>)> = self.pool.install(|| {
            subset
                .samples
                .par_iter()
                .map(|sample| (sample, self.decode(&sample.path)))
                .collect()
        });

        let (h, w) = (self.height as usize, self.width as usize);
        let bytes_per_image = h * w * 3;
        let mut pixels: Vec<f32> = Vec::with_capacity(decoded.len() * bytes_per_image);
        let mut labels: Vec<Label> = Vec::with_capacity(decoded.len());
        let mut paths = Vec::with_capacity(decoded.len());
        let mut report = LoadReport {
            requested: subset.len(),
            ..LoadReport::default()
        };

        for (sample, result) in decoded {
            match result {
                Ok((path, img)) => {
                    debug_assert_eq!(img.as_raw().len(), bytes_per_image);
                    pixels.extend(img.as_raw().iter().map(|&b| b as f32));
                    labels.push(sample.label);
                    paths.push(path);
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    report.skipped.push(err);
                }
            }
        }

        report.loaded = labels.len();
        if report.loaded == 0 {
            return Ok((LoadedBatch::empty(h, w), report));
        }

        let images = Array4::from_shape_vec((labels.len(), h, w, 3), pixels)?;
        let batch = LoadedBatch {
            images,
            labels: one_hot(&labels),
            paths,
            scale: PixelScale::Raw,
        };

        Ok((batch, report))
    }

    /// Resolve, decode, convert to RGB and resize one image.
    pub fn decode(&self, path: &Path) -> std::result::Result<(PathBuf, RgbImage), PipelineError> {
        let unreadable = |path: &Path, reason: String| PipelineError::UnreadableImage {
            path: path.to_path_buf(),
            reason,
        };

        let resolved = std::path::absolute(path).map_err(|e| unreadable(path, e.to_string()))?;
        if !resolved.is_file() {
            return Err(unreadable(&resolved, "file not found".to_string()));
        }

        let img = image::open(&resolved).map_err(|e| unreadable(&resolved, e.to_string()))?;
        let rgb = img.to_rgb8();
        let resized = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            imageops::resize(&rgb, self.width, self.height, self.filter)
        };

        Ok((resolved, resized))
    }

    /// Same chain as [`ImageLoader::load`] for a single image, already scaled
    /// to 0..=1. Shape `(height, width, 3)`.
    pub fn preprocess(&self, path: &Path) -> Result<Array3<f32>> {
        let (_, img) = self.decode(path)?;
        let (h, w) = (self.height as usize, self.width as usize);
        let pixels = img.as_raw().iter().map(|&b| b as f32 / 255.0).collect();
        Ok(Array3::from_shape_vec((h, w, 3), pixels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataloader::sample::SampleSource;
    use image::{GrayImage, Luma, Rgb};

    fn loader() -> ImageLoader {
        ImageLoader::new(8, 6, 2).unwrap()
    }

    fn write_rgb(path: &Path, colour: [u8; 3], w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb(colour)).save(path).unwrap();
    }

    #[test]
    fn missing_file_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.jpg");
        write_rgb(&good, [200, 40, 40], 20, 12);

        let subset = Subset::new(vec![
            Sample::new(&good, Label::Cataract, SampleSource::CataractCorpus),
            Sample::new(tmp.path().join("missing.jpg"), Label::Normal, SampleSource::CataractCorpus),
        ]);

        let (batch, report) = loader().load(&subset).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.labels.nrows(), 1);
        assert_eq!(batch.class_labels(), vec![Label::Cataract]);
        assert_eq!(report.requested, 2);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(&report.skipped[0], PipelineError::UnreadableImage { path, .. } if path.ends_with("missing.jpg")));
    }

    #[test]
    fn undecodable_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("bogus.jpg");
        std::fs::write(&bogus, b"definitely not a jpeg").unwrap();
        let subset = Subset::new(vec![Sample::new(&bogus, Label::Normal, SampleSource::OcularLeft)]);

        let (batch, report) = loader().load(&subset).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.shape(), (0, 6, 8, 3));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn output_shape_channel_order_and_range() {
        let tmp = tempfile::tempdir().unwrap();
        let red = tmp.path().join("red.png");
        let grey = tmp.path().join("grey.png");
        write_rgb(&red, [255, 0, 0], 3, 3);
        GrayImage::from_pixel(10, 10, Luma([51])).save(&grey).unwrap();

        let subset = Subset::new(vec![
            Sample::new(&red, Label::Cataract, SampleSource::CataractCorpus),
            Sample::new(&grey, Label::Normal, SampleSource::CataractCorpus),
        ]);
        let (batch, _) = loader().load(&subset).unwrap();
        assert_eq!(batch.shape(), (2, 6, 8, 3));
        assert_eq!(batch.images.shape()[0], batch.labels.shape()[0]);

        assert_eq!(batch.images[[0, 2, 3, 0]], 255.0);
        assert_eq!(batch.images[[0, 2, 3, 1]], 0.0);
        assert_eq!(batch.images[[1, 0, 0, 2]], 51.0);

        let batch = batch.normalize();
        assert!(batch.images.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(batch.images[[0, 0, 0, 0]], 1.0);
        assert_eq!(batch.images[[1, 5, 7, 1]], 0.2);
    }

    #[test]
    fn paths_are_resolved_to_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let img = tmp.path().join("a.png");
        write_rgb(&img, [1, 2, 3], 8, 6);
        let subset = Subset::new(vec![Sample::new(&img, Label::Normal, SampleSource::CataractCorpus)]);
        let (batch, _) = loader().load(&subset).unwrap();
        assert!(batch.paths[0].is_absolute());
    }

    #[test]
    fn preprocess_matches_batch_pixels() {
        let tmp = tempfile::tempdir().unwrap();
        let img = tmp.path().join("eye.png");
        write_rgb(&img, [10, 20, 30], 16, 12);
        let single = loader().preprocess(&img).unwrap();
        assert_eq!(single.dim(), (6, 8, 3));

        let subset = Subset::new(vec![Sample::new(&img, Label::Normal, SampleSource::CataractCorpus)]);
        let (batch, _) = loader().load(&subset).unwrap();
        let batch = batch.normalize();
        assert_eq!(batch.images.index_axis(ndarray::Axis(0), 0), single);
    }
}
