// The pipeline as explicit stages. Each stage is a function over the previous
// stage's output; `Pipeline::run` chains them and tags failures with the stage
// they came from.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dataloader::balance::downsample;
use crate::dataloader::config::PipelineConfig;
use crate::dataloader::data_batch::LoadedBatch;
use crate::dataloader::datasource::{resolve_sources, DataSource};
use crate::dataloader::error::{PipelineError, Result};
use crate::dataloader::for_imagescsv::SheetLabelDeriver;
use crate::dataloader::for_imagesdir::DirectoryLabelDeriver;
use crate::dataloader::image_loader::ImageLoader;
use crate::dataloader::info::{print_class_counts, print_dataset_info, print_load_report, print_source_breakdown};
use crate::dataloader::sample::Subset;
use crate::dataloader::split::{assemble, split_dataset, DatasetSplit, SplitDataset};
use crate::ensemble::WeightedEnsemble;
use crate::evaluate::history_plot::save_history_plot;
use crate::evaluate::metrics::{evaluate, positive_probabilities, Evaluation};
use crate::evaluate::report::{print_comparison, print_evaluation};
use crate::evaluate::roc_plot::save_roc_plot;
use crate::evaluate::sample_grid::save_sample_grid;
use crate::model::logistic::{self, LogisticTrainer};
use crate::model::mlp::{self, MlpTrainer};
use crate::model::trainer::{ModelTrainer, TrainingHistory, TrainingOptions};

pub const ENSEMBLE_NAME: &str = "ensemble";
pub const ROC_PLOT_NAME: &str = "roc_curves.png";
pub const TRAIN_SAMPLES_NAME: &str = "train_samples.png";
pub const TEST_SAMPLES_NAME: &str = "test_samples.png";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    DeriveLabels,
    Balance,
    Assemble,
    LoadImages,
    Train,
    Evaluate,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DeriveLabels => "label derivation",
            Stage::Balance => "class balancing",
            Stage::Assemble => "dataset assembly",
            Stage::LoadImages => "image loading",
            Stage::Train => "training",
            Stage::Evaluate => "evaluation",
            Stage::Persist => "persistence",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

fn at(stage: Stage) -> impl Fn(PipelineError) -> StageError {
    move |source| StageError { stage, source }
}

/// Labelled samples per source, before balancing.
#[derive(Clone, Debug, Default)]
pub struct LabelledSources {
    /// Directory corpus, used as is.
    pub corpus: Subset,
    pub left: Subset,
    pub right: Subset,
}

pub fn derive_labels(config: &PipelineConfig) -> Result<LabelledSources> {
    let mut labelled = LabelledSources::default();

    for source in resolve_sources(config)? {
        match source {
            DataSource::ImageDirectory {
                path,
                normal_dir,
                cataract_dir,
            } => {
                let deriver = DirectoryLabelDeriver::new(&path, &normal_dir, &cataract_dir, config.sort_dataset)?;
                labelled.corpus = deriver.derive()?;
            }
            DataSource::ImageCSV {
                path,
                image_root,
                columns,
            } => {
                let eyes = SheetLabelDeriver::new(&path, &image_root, columns)?.derive()?;
                labelled.left = eyes.left;
                labelled.right = eyes.right;
            }
        }
    }

    tracing::info!(
        corpus = labelled.corpus.len(),
        left = labelled.left.len(),
        right = labelled.right.len(),
        "derived labels"
    );
    Ok(labelled)
}

/// Downsample each eye subset. The directory corpus is kept whole.
pub fn balance_sources(sources: &LabelledSources, seed: u64) -> LabelledSources {
    LabelledSources {
        corpus: sources.corpus.clone(),
        left: downsample(&sources.left, seed),
        right: downsample(&sources.right, seed),
    }
}

pub fn assemble_dataset(sources: &LabelledSources, config: &PipelineConfig) -> Result<SplitDataset> {
    let dataset = assemble([&sources.corpus, &sources.left, &sources.right]);
    if dataset.is_empty() {
        return Err(PipelineError::EmptyDataset("assembled dataset".to_string()));
    }
    print_source_breakdown(&dataset);
    split_dataset(&dataset, config.test_ratio, config.val_ratio, config.seed)
}

/// Decoded and normalized splits. `train` is shared with the mini-batch
/// producer threads.
pub struct PreparedSplits {
    pub train: Arc<LoadedBatch>,
    pub val: LoadedBatch,
    pub test: LoadedBatch,
}

pub fn load_splits(loader: &ImageLoader, split: &SplitDataset) -> Result<PreparedSplits> {
    let load = |which: DatasetSplit| -> Result<LoadedBatch> {
        let (batch, report) = loader.load(split.get(which))?;
        print_load_report(which, &report);
        let batch = batch.normalize();
        batch.ensure_non_empty(&which.to_string())?;
        tracing::debug!(split = %which, shape = ?batch.shape(), "split ready");
        Ok(batch)
    };

    Ok(PreparedSplits {
        train: Arc::new(load(DatasetSplit::Train)?),
        val: load(DatasetSplit::Validation)?,
        test: load(DatasetSplit::Test)?,
    })
}

/// Labelled example grids of the train and test splits.
pub fn save_sample_grids(splits: &PreparedSplits, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(2);
    for (batch, name) in [(&*splits.train, TRAIN_SAMPLES_NAME), (&splits.test, TEST_SAMPLES_NAME)] {
        let path = config.output_dir.join(name);
        save_sample_grid(batch, &path)?;
        written.push(path);
    }
    Ok(written)
}

pub fn train_models(models: &mut [Box<dyn ModelTrainer>], splits: &PreparedSplits) -> Result<Vec<TrainingHistory>> {
    let mut histories = Vec::with_capacity(models.len());
    for model in models.iter_mut() {
        tracing::info!(model = model.name(), train = splits.train.len(), val = splits.val.len(), "training");
        let history = model.fit(Arc::clone(&splits.train), &splits.val)?;
        history.print();
        histories.push(history);
    }
    Ok(histories)
}

/// Every model on the test split, plus the weighted ensemble when exactly two
/// models were trained.
pub fn evaluate_models(models: &[Box<dyn ModelTrainer>], test: &LoadedBatch) -> Result<Vec<(String, Evaluation)>> {
    let targets = test.class_labels();
    let mut results = Vec::with_capacity(models.len() + 1);

    for model in models {
        let probs = model.predict_proba(&test.images)?;
        let eval = evaluate(&targets, &positive_probabilities(&probs))?;
        print_evaluation(model.name(), &eval);
        results.push((model.name().to_string(), eval));
    }

    if let [first, second] = models {
        let combined = WeightedEnsemble::default().predict_proba([&**first, &**second], &test.images)?;
        let eval = evaluate(&targets, &positive_probabilities(&combined))?;
        print_evaluation(ENSEMBLE_NAME, &eval);
        results.push((ENSEMBLE_NAME.to_string(), eval));
    }

    print_comparison(&results);
    Ok(results)
}

/// Model weights as `<name>.json`, histories as `<name>_history.json` with
/// their curves in `<name>_history.png`.
pub fn save_models(
    models: &[Box<dyn ModelTrainer>],
    histories: &[TrainingHistory],
    config: &PipelineConfig,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.output_dir)?;
    let mut written = Vec::new();

    for model in models {
        let path = config.output_dir.join(format!("{}.json", model.name()));
        model.save(&path)?;
        tracing::info!(model = model.name(), path = %path.display(), "saved model");
        written.push(path);
    }
    for history in histories {
        let path = config.output_dir.join(format!("{}_history.json", history.model));
        serde_json::to_writer_pretty(BufWriter::new(File::create(&path)?), history)?;
        written.push(path);

        let plot = config.output_dir.join(format!("{}_history.png", history.model));
        save_history_plot(history, &plot)?;
        written.push(plot);
    }

    Ok(written)
}

pub struct PipelineReport {
    pub dataset: SplitDataset,
    pub histories: Vec<TrainingHistory>,
    pub evaluations: Vec<(String, Evaluation)>,
    pub roc_plot: PathBuf,
    pub artifacts: Vec<PathBuf>,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    /// Baseline first, mish network second, matching the ensemble weights.
    pub fn default_models(&self) -> Vec<Box<dyn ModelTrainer>> {
        vec![
            Box::new(LogisticTrainer::new(
                "logistic_baseline",
                TrainingOptions::from_config(&self.config, logistic::DEFAULT_LEARNING_RATE),
            )),
            Box::new(MlpTrainer::new(
                "mish_mlp",
                TrainingOptions::from_config(&self.config, mlp::DEFAULT_LEARNING_RATE),
            )),
        ]
    }

    pub fn run(&self) -> std::result::Result<PipelineReport, StageError> {
        self.run_with(self.default_models())
    }

    pub fn run_with(&self, mut models: Vec<Box<dyn ModelTrainer>>) -> std::result::Result<PipelineReport, StageError> {
        let config = &self.config;

        tracing::info!(stage = %Stage::DeriveLabels, "starting");
        let labelled = derive_labels(config).map_err(at(Stage::DeriveLabels))?;
        print_class_counts("Cataract corpus", &labelled.corpus);
        print_class_counts("Left eye", &labelled.left);
        print_class_counts("Right eye", &labelled.right);

        tracing::info!(stage = %Stage::Balance, "starting");
        let balanced = balance_sources(&labelled, config.seed);
        print_class_counts("Left eye (balanced)", &balanced.left);
        print_class_counts("Right eye (balanced)", &balanced.right);

        tracing::info!(stage = %Stage::Assemble, "starting");
        let dataset = assemble_dataset(&balanced, config).map_err(at(Stage::Assemble))?;
        print_dataset_info(&dataset, config);

        tracing::info!(stage = %Stage::LoadImages, "starting");
        let loader = ImageLoader::from_config(config).map_err(at(Stage::LoadImages))?;
        let splits = load_splits(&loader, &dataset).map_err(at(Stage::LoadImages))?;
        let sample_grids = save_sample_grids(&splits, config).map_err(at(Stage::LoadImages))?;

        tracing::info!(stage = %Stage::Train, models = models.len(), "starting");
        let histories = train_models(&mut models, &splits).map_err(at(Stage::Train))?;

        tracing::info!(stage = %Stage::Evaluate, "starting");
        let evaluations = evaluate_models(&models, &splits.test).map_err(at(Stage::Evaluate))?;
        let curves: Vec<(&str, &_)> = evaluations.iter().map(|(name, eval)| (name.as_str(), &eval.roc)).collect();
        let roc_plot = config.output_dir.join(ROC_PLOT_NAME);
        save_roc_plot(&curves, &roc_plot).map_err(at(Stage::Evaluate))?;

        tracing::info!(stage = %Stage::Persist, "starting");
        let mut artifacts = save_models(&models, &histories, config).map_err(at(Stage::Persist))?;
        artifacts.extend(sample_grids);

        Ok(PipelineReport {
            dataset,
            histories,
            evaluations,
            roc_plot,
            artifacts,
        })
    }
}
