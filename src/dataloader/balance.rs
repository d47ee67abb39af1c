use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use super::sample::{Label, Sample, Subset};

/// Downsample the larger class to the size of the smaller one.
///
/// The cataract class is expected to be the minority. The reverse case is
/// handled symmetrically but logged. Minority samples keep their order and come
/// first, followed by the sampled majority in their original relative order.
/// If either class is absent the result is empty.
pub fn downsample(subset: &Subset, seed: u64) -> Subset {
    let counts = subset.class_counts();
    let (minority, majority) = if counts[Label::Cataract.index()] <= counts[Label::Normal.index()] {
        (Label::Cataract, Label::Normal)
    } else {
        (Label::Normal, Label::Cataract)
    };

    if majority == Label::Cataract {
        tracing::warn!(
            normal = counts[0],
            cataract = counts[1],
            "cataract is the majority class, downsampling it instead"
        );
    }

    let target = counts[minority.index()];
    if target == 0 {
        tracing::warn!(
            normal = counts[0],
            cataract = counts[1],
            "one class has no samples, balanced subset is empty"
        );
        return Subset::default();
    }

    let majority_samples: Vec<&Sample> = subset.iter().filter(|s| s.label == majority).collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, majority_samples.len(), target).into_vec();
    picked.sort_unstable();

    let balanced: Subset = subset
        .iter()
        .filter(|s| s.label == minority)
        .cloned()
        .chain(picked.into_iter().map(|i| majority_samples[i].clone()))
        .collect();

    tracing::debug!(
        before = subset.len(),
        after = balanced.len(),
        per_class = target,
        "balanced subset"
    );

    balanced
}
