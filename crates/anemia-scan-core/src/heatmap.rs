//! Attention heatmap rendering.
//!
//! Turns one row of one self-attention head into a colorized overlay: the
//! patch-attention vector is reshaped to the model's patch grid, upsampled to
//! image resolution, normalized, mapped through a rainbow color scale,
//! blended over the source image, and composed side by side with the
//! original. Rendering failures never fail a screening; the unmodified
//! original is returned instead.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use anyhow::{Context, Result};
use candle_core::IndexOp;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, ImageBuffer, Luma, Rgba, RgbaImage};
use tracing::warn;

use crate::inference::AttentionMaps;

/// Heatmap rendering parameters.
#[derive(Debug, Clone, Copy)]
pub struct HeatmapConfig {
    /// Index of the patch whose attention row is visualized.
    pub grid_index: usize,
    /// Encoder layer whose attention is used.
    pub layer_index: usize,
    /// Overlay opacity in `[0, 1]`.
    pub alpha: f32,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            grid_index: 90,
            layer_index: 3,
            alpha: 0.6,
        }
    }
}

/// Renders the side-by-side original/heatmap comparison image.
///
/// `grid` is the model's patches-per-side. On any failure the unmodified
/// original is returned and a warning is logged.
#[must_use]
pub fn render(
    attentions: &AttentionMaps,
    original: &DynamicImage,
    config: &HeatmapConfig,
    grid: usize,
) -> DynamicImage {
    match try_render(attentions, original, config, grid) {
        Ok(img) => img,
        Err(e) => {
            warn!("Heatmap rendering failed, returning original image: {e:#}");
            original.clone()
        }
    }
}

fn try_render(
    attentions: &AttentionMaps,
    original: &DynamicImage,
    config: &HeatmapConfig,
    grid: usize,
) -> Result<DynamicImage> {
    let mask = attention_mask(attentions, config, grid)?;
    let mask = upsample_mask(&mask, grid, original.width(), original.height());
    let mask = normalize_mask(mask);

    let heatmap = colorize(&mask, original.width(), original.height());
    let overlay = blend(&original.to_rgba8(), &heatmap, config.alpha);

    Ok(concat_horizontal(
        original,
        DynamicImage::ImageRgba8(overlay),
    ))
}

/// Extracts one patch's attention row from head 0 of the configured layer.
///
/// The CLS token's row and column are dropped first, leaving a
/// `grid * grid` vector of patch-to-patch attention.
fn attention_mask(
    attentions: &AttentionMaps,
    config: &HeatmapConfig,
    grid: usize,
) -> Result<Vec<f32>> {
    let attn = attentions.get(config.layer_index).with_context(|| {
        format!(
            "Attention layer {} out of range ({} layers)",
            config.layer_index,
            attentions.len()
        )
    })?;

    let (_, _, tokens, _) = attn
        .dims4()
        .context("Attention map is not a 4-d tensor")?;
    anyhow::ensure!(
        tokens == grid * grid + 1,
        "Attention has {tokens} tokens, expected {} for a {grid}x{grid} grid",
        grid * grid + 1
    );
    anyhow::ensure!(
        config.grid_index < grid * grid,
        "Grid index {} out of range for a {grid}x{grid} grid",
        config.grid_index
    );

    // Head 0, CLS row/column dropped, then the configured patch's row.
    let row = attn
        .i((0, 0))?
        .narrow(0, 1, tokens - 1)?
        .narrow(1, 1, tokens - 1)?
        .i(config.grid_index)?
        .to_vec1::<f32>()
        .context("Failed to read attention row")?;

    Ok(row)
}

/// Bilinearly upsamples a `grid`x`grid` mask to `width`x`height`.
fn upsample_mask(mask: &[f32], grid: usize, width: u32, height: u32) -> Vec<f32> {
    let small: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_vec(grid as u32, grid as u32, mask.to_vec())
            .unwrap_or_else(|| ImageBuffer::new(grid as u32, grid as u32));

    let resized = imageops::resize(&small, width, height, FilterType::Triangle);
    resized.into_raw()
}

/// Scales a mask by its maximum; no-op when the maximum is not positive.
fn normalize_mask(mut mask: Vec<f32>) -> Vec<f32> {
    let max = mask.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max > 0.0 {
        for v in &mut mask {
            *v /= max;
        }
    }
    mask
}

/// Maps a normalized mask through a rainbow color scale to RGBA.
fn colorize(mask: &[f32], width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = mask
            .get((y * width + x) as usize)
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        rainbow(v)
    })
}

/// Rainbow colormap: r = |2t - 0.5|, g = sin(pi t), b = cos(pi t / 2).
fn rainbow(t: f32) -> Rgba<u8> {
    let r = (2.0 * t - 0.5).abs().clamp(0.0, 1.0);
    let g = (std::f32::consts::PI * t).sin().clamp(0.0, 1.0);
    let b = (std::f32::consts::PI * t / 2.0).cos().clamp(0.0, 1.0);
    Rgba([
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
        255,
    ])
}

/// Alpha-blends `overlay` over `base`: `out = base * (1 - alpha) + overlay * alpha`.
fn blend(base: &RgbaImage, overlay: &RgbaImage, alpha: f32) -> RgbaImage {
    let alpha = alpha.clamp(0.0, 1.0);
    RgbaImage::from_fn(base.width(), base.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        let o = if x < overlay.width() && y < overlay.height() {
            overlay.get_pixel(x, y).0
        } else {
            b
        };
        let mut out = [0u8; 4];
        for c in 0..4 {
            let v = f32::from(b[c]).mul_add(1.0 - alpha, f32::from(o[c]) * alpha);
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    })
}

/// Places two images side by side, left first.
///
/// The right image is rescaled (aspect-preserving) to the left image's height
/// when the heights differ. The canvas height equals the left image's height.
fn concat_horizontal(left: &DynamicImage, right: DynamicImage) -> DynamicImage {
    let (w1, h1) = (left.width(), left.height());
    let (w2, h2) = (right.width(), right.height());

    let right = if h1 == h2 {
        right
    } else {
        let scaled_w = ((u64::from(w2) * u64::from(h1)) / u64::from(h2.max(1))).max(1) as u32;
        right.resize_exact(scaled_w, h1, FilterType::Triangle)
    };

    let mut canvas = image::RgbImage::new(w1 + right.width(), h1);
    imageops::replace(&mut canvas, &left.to_rgb8(), 0, 0);
    imageops::replace(&mut canvas, &right.to_rgb8(), i64::from(w1), 0);

    DynamicImage::ImageRgb8(canvas)
}
