use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::{PipelineError, Result};

pub const CONFIG_ENV_VAR: &str = "CATARACT_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_NAME: &str = "cataract-pipeline.toml";

/// Spreadsheet column names for the ocular dataset.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SheetColumns {
    pub left_fundus: String,
    pub right_fundus: String,
    pub left_keywords: String,
    pub right_keywords: String,
}

impl Default for SheetColumns {
    fn default() -> Self {
        Self {
            left_fundus: "Left-Fundus".to_string(),
            right_fundus: "Right-Fundus".to_string(),
            left_keywords: "Left-Diagnostic Keywords".to_string(),
            right_keywords: "Right-Diagnostic Keywords".to_string(),
        }
    }
}

/// Zero sizes and out of range ratios are rejected by `build`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub image_root: PathBuf,
    pub normal_dir: String,
    pub cataract_dir: String,
    pub ocular_sheet: PathBuf,
    pub ocular_image_root: PathBuf,
    pub columns: SheetColumns,
    pub seed: u64,
    pub test_ratio: f64,
    pub val_ratio: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub batch_size: usize,
    pub prefetch_count: usize,
    pub epochs: usize,
    pub patience: usize,
    pub threads: usize,
    pub sort_dataset: bool,
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    /// Resolve the config file from the environment, falling back to the
    /// default file name and then to built-in defaults.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                let path = expand_path(&path);
                if !path.exists() {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{CONFIG_ENV_VAR} points to missing file {}",
                        path.display()
                    )));
                }
                path
            }
            Err(_) => PathBuf::from(DEFAULT_CONFIG_NAME),
        };

        if path.exists() {
            tracing::info!(path = %path.display(), "loading pipeline config");
            Self::from_path(&path)
        } else {
            tracing::info!("no config file found, using defaults");
            Self::default().build()
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: PipelineConfig = toml::from_str(raw)?;
        config.image_root = expand_path(&config.image_root.to_string_lossy());
        config.ocular_sheet = expand_path(&config.ocular_sheet.to_string_lossy());
        config.ocular_image_root = expand_path(&config.ocular_image_root.to_string_lossy());
        config.output_dir = expand_path(&config.output_dir.to_string_lossy());
        config.build()
    }

    pub fn build(self) -> Result<Self> {
        check_split_ratios(self.test_ratio, self.val_ratio)?;

        if self.image_width == 0 || self.image_height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "image size must be non-zero, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch_size must be non-zero".into()));
        }
        if self.threads == 0 {
            return Err(PipelineError::InvalidConfig("threads must be non-zero".into()));
        }

        Ok(self)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("dataset"),
            normal_dir: "1_normal".to_string(),
            cataract_dir: "2_cataract".to_string(),
            ocular_sheet: PathBuf::from("OD/data.csv"),
            ocular_image_root: PathBuf::from("OD/Training Images"),
            columns: SheetColumns::default(),
            seed: 42,
            test_ratio: 0.2,
            val_ratio: 0.15,
            image_width: 256,
            image_height: 192,
            batch_size: 32,
            prefetch_count: 4,
            epochs: 100,
            patience: 20,
            threads: num_cpus::get(),
            sort_dataset: true,
            output_dir: PathBuf::from("output"),
        }
    }
}

fn check_split_ratios(test_ratio: f64, val_ratio: f64) -> Result<()> {
    let in_range = |r: f64| r > 0.0 && r < 1.0;
    if !in_range(test_ratio) || !in_range(val_ratio) {
        return Err(PipelineError::InvalidSplitRatios {
            test: test_ratio,
            val: val_ratio,
        });
    }
    Ok(())
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

// Unknown variables are left as written
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_training_setup() {
        let config = PipelineConfig::default().build().unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!((config.image_width, config.image_height), (256, 192));
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.columns.left_keywords, "Left-Diagnostic Keywords");
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
image_root = "/data/fundus"
ocular_image_root = "/data/od/images"
seed = 7

[columns]
left_fundus = "left_file"
"#,
        )
        .unwrap();
        assert_eq!(config.image_root, PathBuf::from("/data/fundus"));
        assert_eq!(config.ocular_image_root, PathBuf::from("/data/od/images"));
        assert_eq!(config.seed, 7);
        assert_eq!(config.columns.left_fundus, "left_file");
        assert_eq!(config.columns.right_fundus, "Right-Fundus");
        assert_eq!(config.test_ratio, 0.2);
    }

    #[test]
    fn rejects_bad_ratios() {
        let err = PipelineConfig::from_toml("test_ratio = 1.5").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSplitRatios { .. }));
    }

    #[test]
    fn rejects_zero_image_size() {
        let err = PipelineConfig::from_toml("image_width = 0").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn expands_env_variables() {
        std::env::set_var("CATARACT_TEST_ROOT", "/mnt/eyes");
        assert_eq!(
            expand_path("${CATARACT_TEST_ROOT}/od"),
            PathBuf::from("/mnt/eyes/od")
        );
        assert_eq!(
            expand_path("${CATARACT_TEST_UNSET_VAR}/od"),
            PathBuf::from("${CATARACT_TEST_UNSET_VAR}/od")
        );
    }
}
