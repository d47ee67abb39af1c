use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::datasource::FundusCategory;
use super::error::{PipelineError, Result};
use super::sample::{Sample, SampleSource, Subset};

const GLAUCOMA_DIR: &str = "3_glaucoma";
const RETINA_DISEASE_DIR: &str = "4_retina_disease";

/// Derives labels from `<root>/<category>/<file>`.
pub struct DirectoryLabelDeriver {
    dir: PathBuf,
    normal_dir: String,
    cataract_dir: String,
    valid_extensions: HashSet<String>,
    sort_dataset: bool,
}

impl DirectoryLabelDeriver {
    pub fn new(dir: &Path, normal_dir: &str, cataract_dir: &str, sort_dataset: bool) -> Result<Self> {
        if !dir.is_dir() {
            return Err(PipelineError::DataSourceNotFound(vec![dir.to_path_buf()]));
        }

        let valid_extensions = image::ImageFormat::all()
            .flat_map(|format| format.extensions_str())
            .map(|ext| ext.to_string())
            .collect();

        Ok(DirectoryLabelDeriver {
            dir: dir.to_owned(),
            normal_dir: normal_dir.to_owned(),
            cataract_dir: cataract_dir.to_owned(),
            valid_extensions,
            sort_dataset,
        })
    }

    pub fn category_of(&self, dir_name: &str) -> Option<FundusCategory> {
        if dir_name == self.normal_dir {
            Some(FundusCategory::Normal)
        } else if dir_name == self.cataract_dir {
            Some(FundusCategory::Cataract)
        } else if dir_name == GLAUCOMA_DIR {
            Some(FundusCategory::Glaucoma)
        } else if dir_name == RETINA_DISEASE_DIR {
            Some(FundusCategory::RetinaDisease)
        } else {
            None
        }
    }

    /// Files under unrecognised directories, and under categories without a
    /// binary label, are skipped without a warning.
    pub fn derive(&self) -> Result<Subset> {
        let mut samples = Vec::new();
        let mut excluded = 0usize;

        for entry in std::fs::read_dir(&self.dir)?.filter_map(std::result::Result::ok) {
            let category_path = entry.path();
            if !category_path.is_dir() {
                continue;
            }
            let Some(dir_name) = category_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(category) = self.category_of(dir_name) else {
                continue;
            };

            let files = self.image_files(&category_path)?;
            match category.binary_label() {
                Some(label) => samples.extend(
                    files
                        .into_iter()
                        .map(|path| Sample::new(path, label, SampleSource::CataractCorpus)),
                ),
                None => excluded += files.len(),
            }
        }

        // Listing order varies by filesystem; the seeded split needs a fixed one
        if self.sort_dataset {
            samples.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        }

        tracing::debug!(
            kept = samples.len(),
            excluded,
            root = %self.dir.display(),
            "derived labels from image directories"
        );

        Ok(Subset::new(samples))
    }

    fn image_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.is_valid_extension(path))
            .collect())
    }

    fn is_valid_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.valid_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataloader::sample::Label;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), b"not decoded here").unwrap();
    }

    #[test]
    fn keeps_only_normal_and_cataract() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("1_normal"), "n1.png");
        touch(&root.join("1_normal"), "n2.JPG");
        touch(&root.join("2_cataract"), "c1.jpg");
        touch(&root.join("3_glaucoma"), "g1.png");
        touch(&root.join("4_retina_disease"), "r1.png");
        touch(&root.join("misc"), "m1.png");
        touch(&root.join("1_normal"), "notes.txt");
        touch(root, "stray.png");

        let deriver = DirectoryLabelDeriver::new(root, "1_normal", "2_cataract", true).unwrap();
        let subset = deriver.derive().unwrap();

        assert_eq!(subset.len(), 3);
        assert_eq!(subset.class_counts(), [2, 1]);
        assert!(subset
            .iter()
            .all(|s| s.source == SampleSource::CataractCorpus));
        let cataract: Vec<_> = subset.iter().filter(|s| s.label == Label::Cataract).collect();
        assert!(cataract[0].path.ends_with("2_cataract/c1.jpg"));
    }

    #[test]
    fn sorted_output_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "c.png"] {
            touch(&tmp.path().join("1_normal"), name);
        }
        let deriver = DirectoryLabelDeriver::new(tmp.path(), "1_normal", "2_cataract", true).unwrap();
        let names: Vec<_> = deriver
            .derive()
            .unwrap()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn missing_root_is_not_found() {
        let err = DirectoryLabelDeriver::new(Path::new("/definitely/not/here"), "1_normal", "2_cataract", true)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::DataSourceNotFound(_)));
    }
}
