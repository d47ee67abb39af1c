pub mod canvas;
pub mod history_plot;
pub mod metrics;
pub mod report;
pub mod roc_plot;
pub mod sample_grid;
