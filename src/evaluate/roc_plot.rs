use std::path::Path;

use image::{Rgb, RgbImage};

use crate::dataloader::error::Result;

use super::canvas::{draw_line, save_png, PlotArea, BACKGROUND, PALETTE};
use super::metrics::RocCurve;

const CHANCE: Rgb<u8> = Rgb([0, 0, 0]);

/// Colour of each curve, in input order. The PNG carries no text, so this is
/// the key to which curve is which model.
pub fn legend(curves: &[(&str, &RocCurve)]) -> Vec<(String, Rgb<u8>)> {
    curves
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.to_string(), PALETTE[i % PALETTE.len()]))
        .collect()
}

/// Every curve on one canvas with the chance diagonal. x is false positive
/// rate, y is true positive rate. The legend is a colour swatch per curve,
/// top to bottom in input order, in the lower right corner.
pub fn render_roc_curves(curves: &[(&str, &RocCurve)], width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    let plot = PlotArea::new(width, height);

    plot.draw_frame(&mut canvas);
    draw_line(&mut canvas, plot.to_px(0.0, 0.0), plot.to_px(1.0, 1.0), CHANCE, Some(6));

    for (i, ((name, colour), (_, curve))) in legend(curves).into_iter().zip(curves).enumerate() {
        let points: Vec<(f64, f64)> = curve.fpr.iter().copied().zip(curve.tpr.iter().copied()).collect();
        plot.draw_series(&mut canvas, &points, colour);
        plot.draw_swatch(&mut canvas, i, curves.len(), colour);
        tracing::debug!(model = %name, slot = i, auc = curve.auc(), "drew roc curve");
    }

    canvas
}

pub fn save_roc_plot(curves: &[(&str, &RocCurve)], path: &Path) -> Result<()> {
    save_png(&render_roc_curves(curves, 640, 480), path)?;
    for (model, colour) in legend(curves) {
        tracing::info!(model = %model, colour = ?colour.0, path = %path.display(), "roc legend");
    }
    Ok(())
}
