use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::data_batch::LoadedBatch;

pub struct MiniBatch {
    pub images: Array4<f32>,
    pub labels: Array2<f32>,
    pub batch_number: usize,
}

impl MiniBatch {
    pub fn len(&self) -> usize {
        self.labels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn steps_per_epoch(samples: usize, batch_size: usize) -> usize {
    samples.div_ceil(batch_size)
}

/// Mini-batches of a [`LoadedBatch`] assembled on a background thread, at most
/// `prefetch` ahead of the consumer. The last batch may be short.
pub struct MiniBatchIterator {
    receiver: Receiver<MiniBatch>,
    steps: usize,
}

impl MiniBatchIterator {
    fn new(data: Arc<LoadedBatch>, batch_size: usize, prefetch: usize, shuffle_seed: Option<u64>) -> Self {
        let batch_size = batch_size.max(1);
        let (sender, receiver) = bounded(prefetch.max(1));
        let steps = steps_per_epoch(data.len(), batch_size);

        let mut order: Vec<usize> = (0..data.len()).collect();
        if let Some(seed) = shuffle_seed {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        thread::spawn(move || {
            for (batch_number, indices) in order.chunks(batch_size).enumerate() {
                let (images, labels) = data.select(indices);
                let batch = MiniBatch {
                    images,
                    labels,
                    batch_number,
                };
                // Receiver dropped, consumer stopped early
                if sender.send(batch).is_err() {
                    break;
                }
            }
        });

        MiniBatchIterator { receiver, steps }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Iterator for MiniBatchIterator {
    type Item = MiniBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

pub trait ParallelMiniBatches {
    fn par_iter(self: Arc<Self>, batch_size: usize, prefetch: usize, shuffle_seed: Option<u64>) -> MiniBatchIterator;
}

impl ParallelMiniBatches for LoadedBatch {
    fn par_iter(self: Arc<Self>, batch_size: usize, prefetch: usize, shuffle_seed: Option<u64>) -> MiniBatchIterator {
        MiniBatchIterator::new(self, batch_size, prefetch, shuffle_seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataloader::data_batch::{one_hot, PixelScale};
    use crate::dataloader::sample::Label;
    use std::path::PathBuf;

    fn numbered_batch(n: usize) -> Arc<LoadedBatch> {
        let images = Array4::from_shape_fn((n, 1, 1, 3), |(i, _, _, _)| i as f32);
        let labels: Vec<Label> = (0..n)
            .map(|i| if i % 2 == 0 { Label::Normal } else { Label::Cataract })
            .collect();
        Arc::new(LoadedBatch {
            images,
            labels: one_hot(&labels),
            paths: (0..n).map(|i| PathBuf::from(format!("{i}.png"))).collect(),
            scale: PixelScale::Unit,
        })
    }

    #[test]
    fn covers_every_sample_once_with_short_tail() {
        let batches: Vec<MiniBatch> = numbered_batch(70).par_iter(32, 2, None).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(MiniBatch::len).collect::<Vec<_>>(), vec![32, 32, 6]);
        assert_eq!(batches[2].batch_number, 2);
        assert_eq!(batches[1].images[[0, 0, 0, 0]], 32.0);
    }

    #[test]
    fn shuffled_batches_keep_images_and_labels_aligned() {
        let batches: Vec<MiniBatch> = numbered_batch(50).par_iter(8, 4, Some(42)).collect();
        let mut seen = Vec::new();
        for batch in &batches {
            for row in 0..batch.len() {
                let id = batch.images[[row, 0, 0, 0]] as usize;
                let expected = if id % 2 == 0 { 0.0 } else { 1.0 };
                assert_eq!(batch.labels[[row, 1]], expected);
                seen.push(id);
            }
        }
        assert_ne!(seen, (0..50).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn steps_round_up() {
        assert_eq!(steps_per_epoch(64, 32), 2);
        assert_eq!(steps_per_epoch(65, 32), 3);
        assert_eq!(steps_per_epoch(0, 32), 0);
        assert_eq!(numbered_batch(10).par_iter(4, 1, None).steps(), 3);
    }
}
