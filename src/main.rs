use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use cataract_pipeline::dataloader::config::PipelineConfig;
use cataract_pipeline::pipeline::Pipeline;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match PipelineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = Pipeline::new(config);
    match pipeline.run() {
        Ok(report) => {
            println!("\nDataset: {} samples", report.dataset.len());
            println!("ROC curves: {}", report.roc_plot.display());
            for path in &report.artifacts {
                println!("Wrote {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(stage = %e.stage, "pipeline stopped");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
