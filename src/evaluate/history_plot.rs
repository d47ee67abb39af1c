use std::path::Path;

use image::{Rgb, RgbImage};

use crate::dataloader::error::Result;
use crate::model::trainer::{EpochMetrics, TrainingHistory};

use super::canvas::{save_png, PlotArea, BACKGROUND, PALETTE};

pub const TRAIN_COLOUR: Rgb<u8> = PALETTE[0];
pub const VAL_COLOUR: Rgb<u8> = PALETTE[1];

/// Two panels side by side: loss on the left, accuracy on the right. Train is
/// drawn in `TRAIN_COLOUR`, validation in `VAL_COLOUR`, epochs run left to
/// right. Loss is scaled to the largest value seen, accuracy to 0..=1.
pub fn render_history(history: &TrainingHistory, width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    let half = width / 2;
    let loss_panel = PlotArea::within(0, 0, half, height);
    let accuracy_panel = PlotArea::within(half, 0, width - half, height);
    loss_panel.draw_frame(&mut canvas);
    accuracy_panel.draw_frame(&mut canvas);

    let epochs = &history.epochs;
    let last = epochs.len().saturating_sub(1).max(1) as f64;
    let x = |i: usize| i as f64 / last;

    let loss_max = epochs
        .iter()
        .flat_map(|m| [m.loss, m.val_loss])
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);
    let loss_scale = if loss_max > 0.0 { loss_max } else { 1.0 };

    let series = |value: fn(&EpochMetrics) -> f64, scale: f64| -> Vec<(f64, f64)> {
        epochs.iter().enumerate().map(|(i, m)| (x(i), value(m) / scale)).collect()
    };

    loss_panel.draw_series(&mut canvas, &series(|m| m.loss, loss_scale), TRAIN_COLOUR);
    loss_panel.draw_series(&mut canvas, &series(|m| m.val_loss, loss_scale), VAL_COLOUR);
    accuracy_panel.draw_series(&mut canvas, &series(|m| m.accuracy, 1.0), TRAIN_COLOUR);
    accuracy_panel.draw_series(&mut canvas, &series(|m| m.val_accuracy, 1.0), VAL_COLOUR);

    for panel in [loss_panel, accuracy_panel] {
        panel.draw_swatch(&mut canvas, 0, 2, TRAIN_COLOUR);
        panel.draw_swatch(&mut canvas, 1, 2, VAL_COLOUR);
    }

    tracing::debug!(model = %history.model, epochs = epochs.len(), loss_max, "drew training history");
    canvas
}

/// Writes `render_history` at 960x400.
pub fn save_history_plot(history: &TrainingHistory, path: &Path) -> Result<()> {
    save_png(&render_history(history, 960, 400), path)?;
    tracing::info!(model = %history.model, path = %path.display(), "saved training curves");
    Ok(())
}
