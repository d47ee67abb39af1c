use std::path::PathBuf;

use super::config::{PipelineConfig, SheetColumns};
use super::error::{PipelineError, Result};
use super::sample::Label;

pub enum DataSource {
    /// Root holding one subdirectory per fundus category.
    ImageDirectory {
        path: PathBuf,
        normal_dir: String,
        cataract_dir: String,
    },
    /// Spreadsheet with per-eye filenames and diagnostic keywords.
    ImageCSV {
        path: PathBuf,
        image_root: PathBuf,
        columns: SheetColumns,
    },
}

impl DataSource {
    pub fn path(&self) -> &PathBuf {
        match self {
            DataSource::ImageDirectory { path, .. } => path,
            DataSource::ImageCSV { path, .. } => path,
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            DataSource::ImageDirectory { path, .. } => path.is_dir(),
            DataSource::ImageCSV { path, .. } => path.is_file(),
        }
    }
}

/// The four categories of the directory corpus. Only two carry a binary label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FundusCategory {
    Normal,
    Cataract,
    Glaucoma,
    RetinaDisease,
}

impl FundusCategory {
    pub fn binary_label(self) -> Option<Label> {
        match self {
            FundusCategory::Normal => Some(Label::Normal),
            FundusCategory::Cataract => Some(Label::Cataract),
            FundusCategory::Glaucoma | FundusCategory::RetinaDisease => None,
        }
    }
}

/// Both configured sources, keeping only those present on disk.
/// Fails only when neither is found.
pub fn resolve_sources(config: &PipelineConfig) -> Result<Vec<DataSource>> {
    let candidates = vec![
        DataSource::ImageDirectory {
            path: config.image_root.clone(),
            normal_dir: config.normal_dir.clone(),
            cataract_dir: config.cataract_dir.clone(),
        },
        DataSource::ImageCSV {
            path: config.ocular_sheet.clone(),
            image_root: config.ocular_image_root.clone(),
            columns: config.columns.clone(),
        },
    ];

    let searched: Vec<PathBuf> = candidates.iter().map(|s| s.path().clone()).collect();

    let found: Vec<DataSource> = candidates
        .into_iter()
        .filter(|source| {
            let exists = source.exists();
            if !exists {
                tracing::warn!(path = %source.path().display(), "data source not found, skipping");
            }
            exists
        })
        .collect();

    if found.is_empty() {
        return Err(PipelineError::DataSourceNotFound(searched));
    }

    Ok(found)
}
