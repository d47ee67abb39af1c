use std::path::PathBuf;

use thiserror::Error;

use super::sample::Label;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    // Startup and data source errors
    #[error("No dataset source found (looked for {})", format_paths(.0))]
    DataSourceNotFound(Vec<PathBuf>),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Spreadsheet error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Model artifact error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Invalid dataset split ratios. Test: {test}, Validation: {val}")]
    InvalidSplitRatios { test: f64, val: f64 },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    // Per sample, recorded in the load report rather than returned
    #[error("Unreadable image {path}: {reason}")]
    UnreadableImage { path: PathBuf, reason: String },

    // Dataset level
    #[error("No usable samples in the {0} subset")]
    EmptyDataset(String),

    #[error("Cannot stratify {stage}: class {label} has {count} sample(s), needs at least {needed}")]
    StratificationInfeasible {
        stage: &'static str,
        label: Label,
        count: usize,
        needed: usize,
    },

    #[error("Expected {expected} entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    // Evaluation
    #[error("Metric {metric} is undefined: {reason}")]
    UndefinedMetric {
        metric: &'static str,
        reason: String,
    },

    #[error("Model trainer {model} failed: {reason}")]
    TrainerError { model: String, reason: String },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
