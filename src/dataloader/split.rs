use std::collections::HashSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::error::{PipelineError, Result};
use super::sample::{Label, Sample, Subset};

// Keeps e.g. 0.15 * 320 from rounding up to 49
const RATIO_EPSILON: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DatasetSplit {
    Train,
    Validation,
    Test,
}

impl DatasetSplit {
    pub const ALL: [DatasetSplit; 3] = [DatasetSplit::Train, DatasetSplit::Validation, DatasetSplit::Test];
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSplit::Train => f.write_str("train"),
            DatasetSplit::Validation => f.write_str("validation"),
            DatasetSplit::Test => f.write_str("test"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitDataset {
    pub train: Subset,
    pub val: Subset,
    pub test: Subset,
}

impl SplitDataset {
    pub fn get(&self, split: DatasetSplit) -> &Subset {
        match split {
            DatasetSplit::Train => &self.train,
            DatasetSplit::Validation => &self.val,
            DatasetSplit::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concatenate labelled subsets into one dataset. A path seen twice is kept
/// only once so that it cannot land in two partitions.
pub fn assemble<'a>(parts: impl IntoIterator<Item = &'a Subset>) -> Subset {
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    let dataset: Subset = Subset::concat(parts)
        .samples
        .into_iter()
        .filter(|s| {
            let fresh = seen.insert(s.path.clone());
            if !fresh {
                duplicates += 1;
            }
            fresh
        })
        .collect();

    if duplicates > 0 {
        tracing::warn!(duplicates, "dropped samples with duplicate paths while assembling dataset");
    }
    dataset
}

/// Two stage stratified split: `test_ratio` of the whole dataset goes to
/// test, then `val_ratio` of the remainder goes to validation.
pub fn split_dataset(dataset: &Subset, test_ratio: f64, val_ratio: f64, seed: u64) -> Result<SplitDataset> {
    let (train_val, test) = stratified_split(dataset, test_ratio, seed, "train+val/test")?;
    let (train, val) = stratified_split(&train_val, val_ratio, seed, "train/val")?;
    Ok(SplitDataset { train, val, test })
}

/// Returns `(kept, held_out)` where `held_out` has `ceil(ratio * n)` samples
/// spread over the classes in proportion to their size.
pub fn stratified_split(subset: &Subset, ratio: f64, seed: u64, stage: &'static str) -> Result<(Subset, Subset)> {
    let counts = subset.class_counts();
    let total = subset.len();
    let held_out_total = ((ratio * total as f64 - RATIO_EPSILON).ceil() as usize).min(total);

    for label in Label::ALL {
        let count = counts[label.index()];
        if count < 2 {
            return Err(PipelineError::StratificationInfeasible {
                stage,
                label,
                count,
                needed: 2,
            });
        }
    }

    let allocation = allocate(&counts, held_out_total, total);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut kept: Vec<Sample> = Vec::with_capacity(total - held_out_total);
    let mut held_out: Vec<Sample> = Vec::with_capacity(held_out_total);

    for label in Label::ALL {
        let mut members: Vec<&Sample> = subset.iter().filter(|s| s.label == label).collect();
        members.shuffle(&mut rng);
        let take = allocation[label.index()];
        held_out.extend(members[..take].iter().map(|s| (*s).clone()));
        kept.extend(members[take..].iter().map(|s| (*s).clone()));
    }

    kept.shuffle(&mut rng);
    held_out.shuffle(&mut rng);

    Ok((Subset::new(kept), Subset::new(held_out)))
}

// Largest remainder allocation, clamped so each class keeps at least one
// sample on both sides.
fn allocate(counts: &[usize; 2], held_out_total: usize, total: usize) -> [usize; 2] {
    let mut allocation = [0usize; 2];
    let mut remainders = [(0.0f64, 0usize); 2];

    for (idx, &count) in counts.iter().enumerate() {
        let exact = count as f64 * held_out_total as f64 / total as f64;
        allocation[idx] = exact.floor() as usize;
        remainders[idx] = (exact - exact.floor(), idx);
    }

    let mut missing = held_out_total.saturating_sub(allocation.iter().sum());
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    for &(_, idx) in remainders.iter().cycle() {
        if missing == 0 {
            break;
        }
        if allocation[idx] < counts[idx] {
            allocation[idx] += 1;
        }
        missing -= 1;
    }

    for (idx, &count) in counts.iter().enumerate() {
        allocation[idx] = allocation[idx].clamp(1, count - 1);
    }
    allocation
}
