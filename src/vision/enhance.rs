//! Image enhancement filters for plate region detection
//!
//! Grayscale frames are denoised with an edge-preserving bilateral filter and
//! then contrast-equalized per tile (CLAHE) so plate borders survive edge
//! detection under uneven lighting.

use image::{GrayImage, Luma};
use tracing::debug;

/// Settings for the enhancement chain
#[derive(Debug, Clone)]
pub struct EnhanceSettings {
    /// Bilateral filter neighbourhood diameter in pixels
    pub bilateral_diameter: u32,
    /// Bilateral range sigma (intensity difference)
    pub sigma_color: f32,
    /// Bilateral spatial sigma
    pub sigma_space: f32,
    /// CLAHE clip limit, relative to a flat histogram
    pub clip_limit: f32,
    /// CLAHE tiles per axis
    pub tile_grid: u32,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            bilateral_diameter: 11,
            sigma_color: 17.0,
            sigma_space: 17.0,
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

/// Denoise then equalize a grayscale frame
pub fn enhance(gray: &GrayImage, settings: &EnhanceSettings) -> GrayImage {
    debug!(
        "Enhancing {}x{} frame: bilateral d={}, clahe clip={} grid={}",
        gray.width(),
        gray.height(),
        settings.bilateral_diameter,
        settings.clip_limit,
        settings.tile_grid
    );

    let denoised = bilateral_filter(
        gray,
        settings.bilateral_diameter,
        settings.sigma_color,
        settings.sigma_space,
    );
    clahe(&denoised, settings.clip_limit, settings.tile_grid)
}

/// Edge-preserving smoothing over a circular window
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2) as i32;
    if radius == 0 || width == 0 || height == 0 {
        return image.clone();
    }

    // Spatial kernel restricted to the disc of the given radius
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = (dx * dx + dy * dy) as f32;
            if dist2.sqrt() <= radius as f32 {
                offsets.push((dx, dy, (dist2 * space_coeff).exp()));
            }
        }
    }

    // Range kernel indexed by absolute intensity difference
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let color_weights: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let mut output = GrayImage::new(width, height);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let center = image.get_pixel(x as u32, y as u32).0[0];
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;

            for &(dx, dy, space_weight) in &offsets {
                // Replicate border pixels
                let sx = (x + dx).clamp(0, max_x) as u32;
                let sy = (y + dy).clamp(0, max_y) as u32;
                let value = image.get_pixel(sx, sy).0[0];
                let weight = space_weight * color_weights[center.abs_diff(value) as usize];
                sum += weight * value as f32;
                weight_sum += weight;
            }

            let filtered = if weight_sum > 0.0 {
                (sum / weight_sum).round().clamp(0.0, 255.0) as u8
            } else {
                center
            };
            output.put_pixel(x as u32, y as u32, Luma([filtered]));
        }
    }

    output
}

/// Contrast-limited adaptive histogram equalization
///
/// The frame is split into `grid` x `grid` tiles; each tile gets its own
/// clipped equalization table and pixels are bilinearly interpolated between
/// the tables of the four nearest tile centers.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || grid == 0 {
        return image.clone();
    }

    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(image, (x0, y0, x1, y1), clip_limit));
        }
    }

    let lut_index = |tx: i64, ty: i64| -> usize {
        let tx = tx.clamp(0, tiles_x as i64 - 1) as usize;
        let ty = ty.clamp(0, tiles_y as i64 - 1) as usize;
        ty * tiles_x as usize + tx
    };

    let mut output = GrayImage::new(width, height);
    for y in 0..height {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty = fy.floor();
        let wy = fy - ty;
        let ty = ty as i64;

        for x in 0..width {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx = fx.floor();
            let wx = fx - tx;
            let tx = tx as i64;

            let value = image.get_pixel(x, y).0[0] as usize;
            let sample = |tx: i64, ty: i64| luts[lut_index(tx, ty)][value] as f32;

            let top = sample(tx, ty) * (1.0 - wx) + sample(tx + 1, ty) * wx;
            let bottom = sample(tx, ty + 1) * (1.0 - wx) + sample(tx + 1, ty + 1) * wx;
            let mapped = top * (1.0 - wy) + bottom * wy;

            output.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
        }
    }

    output
}

/// Clipped equalization table for one tile given as (x0, y0, x1, y1)
fn tile_lut(image: &GrayImage, tile: (u32, u32, u32, u32), clip_limit: f32) -> [u8; 256] {
    let (x0, y0, x1, y1) = tile;
    let area = (x1 - x0) * (y1 - y0);

    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[image.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    // Clip and spread the excess evenly over all bins
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for bin in histogram.iter_mut() {
        *bin += share;
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1);
        for i in (0..256).step_by(step).take(remainder) {
            histogram[i] += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, bin) in histogram.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}
