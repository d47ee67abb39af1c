use std::path::Path;

use image::{Rgb, RgbImage};
use ndarray::{ArrayView3, Axis};

use crate::dataloader::data_batch::{LoadedBatch, PixelScale};
use crate::dataloader::error::Result;
use crate::dataloader::sample::Label;

use super::canvas::{fill_rect, save_png, BACKGROUND, PALETTE};

pub const GRID_ROWS: usize = 5;
pub const GRID_COLS: usize = 5;

const BORDER: u32 = 3;
const GAP: u32 = 4;

/// Frame colour marking the true class of each tile.
pub fn label_colour(label: Label) -> Rgb<u8> {
    match label {
        Label::Normal => PALETTE[2],
        Label::Cataract => PALETTE[3],
    }
}

/// The first `rows * cols` images of the batch, row major, each framed in its
/// label colour. Missing tiles are left blank.
pub fn render_sample_grid(batch: &LoadedBatch, rows: usize, cols: usize) -> RgbImage {
    let (_, height, width, _) = batch.shape();
    let tile_w = width as u32 + 2 * BORDER;
    let tile_h = height as u32 + 2 * BORDER;
    let mut canvas = RgbImage::from_pixel(
        cols as u32 * (tile_w + GAP) + GAP,
        rows as u32 * (tile_h + GAP) + GAP,
        BACKGROUND,
    );

    let scale = match batch.scale {
        PixelScale::Unit => 255.0,
        PixelScale::Raw => 1.0,
    };
    let labels = batch.class_labels();

    for (i, (image, label)) in batch.images.axis_iter(Axis(0)).zip(labels).take(rows * cols).enumerate() {
        let x = GAP + (i % cols) as u32 * (tile_w + GAP);
        let y = GAP + (i / cols) as u32 * (tile_h + GAP);
        fill_rect(&mut canvas, x, y, tile_w, tile_h, label_colour(label));
        blit(&mut canvas, image, x + BORDER, y + BORDER, scale);
    }

    tracing::debug!(
        tiles = batch.len().min(rows * cols),
        width = canvas.width(),
        height = canvas.height(),
        "drew sample grid"
    );
    canvas
}

fn blit(canvas: &mut RgbImage, image: ArrayView3<f32>, x0: u32, y0: u32, scale: f32) {
    for ((row, col, channel), &value) in image.indexed_iter() {
        let pixel = canvas.get_pixel_mut(x0 + col as u32, y0 + row as u32);
        pixel.0[channel] = (value * scale).round().clamp(0.0, 255.0) as u8;
    }
}

pub fn save_sample_grid(batch: &LoadedBatch, path: &Path) -> Result<()> {
    save_png(&render_sample_grid(batch, GRID_ROWS, GRID_COLS), path)?;
    let [normal, cataract] = [Label::Normal, Label::Cataract].map(|l| label_colour(l).0);
    tracing::info!(path = %path.display(), ?normal, ?cataract, "saved sample grid");
    Ok(())
}
