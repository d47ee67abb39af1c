use super::config::PipelineConfig;
use super::image_loader::LoadReport;
use super::par_iter::steps_per_epoch;
use super::sample::{SampleSource, Subset};
use super::split::{DatasetSplit, SplitDataset};

pub fn print_class_counts(name: &str, subset: &Subset) {
    let [normal, cataract] = subset.class_counts();
    println!("{name}: {} samples (normal: {normal}, cataract: {cataract})", subset.len());
}

pub fn print_source_breakdown(dataset: &Subset) {
    println!("Samples by source:");
    for source in [SampleSource::CataractCorpus, SampleSource::OcularLeft, SampleSource::OcularRight] {
        let part: Subset = dataset.iter().filter(|s| s.source == source).cloned().collect();
        let [normal, cataract] = part.class_counts();
        println!("  {:<18} {:>6} (normal: {normal}, cataract: {cataract})", source.to_string(), part.len());
    }
}

pub fn print_dataset_info(split: &SplitDataset, config: &PipelineConfig) {
    let total_size = split.len();

    println!("Dataset Information:");
    println!("-------------------");
    println!("Total size: {}", total_size);
    println!("Batch size: {}", config.batch_size);
    println!();

    for which in DatasetSplit::ALL {
        let subset = split.get(which);
        let size = subset.len();
        let [normal, cataract] = subset.class_counts();
        let share = if size == 0 { 0.0 } else { size as f64 / total_size as f64 * 100.0 };
        let cataract_share = if size == 0 { 0.0 } else { cataract as f64 / size as f64 * 100.0 };

        println!("{} split:", capitalise(&which.to_string()));
        println!("  Size: {} ({:.2}%)", size, share);
        println!("  Normal: {}, Cataract: {} ({:.2}% cataract)", normal, cataract, cataract_share);
        println!("  Batches: {}", steps_per_epoch(size, config.batch_size));
        println!();
    }

    println!("Seed: {}", config.seed);
}

pub fn print_load_report(split: DatasetSplit, report: &LoadReport) {
    println!(
        "Loaded {} split: {}/{} images ({} skipped)",
        split,
        report.loaded,
        report.requested,
        report.skipped.len()
    );
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
