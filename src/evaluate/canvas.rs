// Pixel level drawing shared by the PNG outputs. Coordinates are i64 so lines
// may run off the canvas; anything outside is clipped in `put`.

use image::{Rgb, RgbImage};

pub const MARGIN: u32 = 40;
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
pub const AXIS: Rgb<u8> = Rgb([90, 90, 90]);
pub const GRID: Rgb<u8> = Rgb([225, 225, 225]);

pub const PALETTE: [Rgb<u8>; 6] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
];

/// Maps the unit square onto a pixel rectangle, y growing upwards.
#[derive(Clone, Copy, Debug)]
pub struct PlotArea {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl PlotArea {
    pub fn new(width: u32, height: u32) -> Self {
        Self::within(0, 0, width, height)
    }

    /// Plot area inside the `width` x `height` panel whose top left corner is
    /// at `(x, y)`.
    pub fn within(x: u32, y: u32, width: u32, height: u32) -> Self {
        let margin = MARGIN.min(width / 4).min(height / 4);
        PlotArea {
            left: x + margin,
            right: (x + width).saturating_sub(margin + 1),
            top: y + margin,
            bottom: (y + height).saturating_sub(margin + 1),
        }
    }

    pub fn to_px(&self, x: f64, y: f64) -> (i64, i64) {
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, 1.0) };
        let px = self.left as f64 + x * self.right.saturating_sub(self.left) as f64;
        let py = self.bottom as f64 - y * self.bottom.saturating_sub(self.top) as f64;
        (px.round() as i64, py.round() as i64)
    }

    /// Axes plus a light grid at every tenth.
    pub fn draw_frame(&self, canvas: &mut RgbImage) {
        for tick in 1..10 {
            let t = tick as f64 / 10.0;
            draw_line(canvas, self.to_px(t, 0.0), self.to_px(t, 1.0), GRID, None);
            draw_line(canvas, self.to_px(0.0, t), self.to_px(1.0, t), GRID, None);
        }
        draw_line(canvas, self.to_px(0.0, 0.0), self.to_px(1.0, 0.0), AXIS, None);
        draw_line(canvas, self.to_px(0.0, 0.0), self.to_px(0.0, 1.0), AXIS, None);
    }

    /// Joins consecutive unit-square points with a thick line. A single point
    /// is drawn as a small square.
    pub fn draw_series(&self, canvas: &mut RgbImage, points: &[(f64, f64)], colour: Rgb<u8>) {
        if let [(x, y)] = points {
            let (px, py) = self.to_px(*x, *y);
            fill_rect(canvas, (px - 2).max(0) as u32, (py - 2).max(0) as u32, 5, 5, colour);
            return;
        }
        for pair in points.windows(2) {
            let from = self.to_px(pair[0].0, pair[0].1);
            let to = self.to_px(pair[1].0, pair[1].1);
            draw_thick_line(canvas, from, to, colour);
        }
    }

    /// Legend swatch for slot `slot` of `slots`, stacked upwards from the
    /// lower right corner.
    pub fn draw_swatch(&self, canvas: &mut RgbImage, slot: usize, slots: usize, colour: Rgb<u8>) {
        let y = self
            .bottom
            .saturating_sub(12 + (slots.saturating_sub(1 + slot)) as u32 * 14);
        fill_rect(canvas, self.right.saturating_sub(30), y, 20, 8, colour);
    }
}

pub fn put(canvas: &mut RgbImage, x: i64, y: i64, colour: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, colour);
    }
}

// Bresenham. `dash` alternates drawn and skipped runs of that many pixels.
pub fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), colour: Rgb<u8>, dash: Option<usize>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    let mut step = 0usize;

    loop {
        let visible = dash.map_or(true, |d| (step / d) % 2 == 0);
        if visible {
            put(canvas, x, y, colour);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
        step += 1;
    }
}

pub fn draw_thick_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), colour: Rgb<u8>) {
    for (ox, oy) in [(0, 0), (1, 0), (0, 1), (-1, 0), (0, -1)] {
        draw_line(canvas, (from.0 + ox, from.1 + oy), (to.0 + ox, to.1 + oy), colour, None);
    }
}

pub fn fill_rect(canvas: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, colour: Rgb<u8>) {
    for py in y..y.saturating_add(h) {
        for px in x..x.saturating_add(w) {
            put(canvas, px as i64, py as i64, colour);
        }
    }
}

/// Creates the parent directory, then writes a PNG.
pub fn save_png(canvas: &RgbImage, path: &std::path::Path) -> crate::dataloader::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(path)?;
    Ok(())
}
