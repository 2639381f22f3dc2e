//! Image preprocessing pipelines.
//!
//! Two independent pipelines feed the same model, matching the training
//! setup of each path:
//!
//! - [`OodProcessor`] mirrors the pretrained backbone's image processor
//!   (resize, scale, normalize to mean 0.5 / std 0.5) and is used only for
//!   the quality gate.
//! - [`ClassifierTransform`] is the resize + `[0, 1]` tensor transform the
//!   classification head was fine-tuned with; it applies no normalization.
//!
//! The two are intentionally not reconciled: consolidating them would change
//! the inputs each path was trained on.

#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

/// Per-channel normalization constants of the pretrained ViT processor.
const OOD_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const OOD_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Preprocessor for the out-of-distribution quality gate.
///
/// Matches the pretrained backbone's image processor: bilinear resize to the
/// model's input size, scale by 1/255, normalize per channel.
#[derive(Debug, Clone)]
pub struct OodProcessor {
    size: u32,
}

impl OodProcessor {
    /// Creates a processor for the given square input size.
    #[must_use]
    pub const fn new(size: u32) -> Self {
        Self { size }
    }

    /// Converts an image to a normalized `(1, 3, size, size)` tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation fails.
    pub fn process(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let data = resized_rgb_chw(image, self.size);

        let plane = (self.size * self.size) as usize;
        let normalized: Vec<f32> = data
            .iter()
            .enumerate()
            .map(|(i, &v)| (v - OOD_MEAN[i / plane]) / OOD_STD[i / plane])
            .collect();

        Tensor::from_vec(
            normalized,
            (1, 3, self.size as usize, self.size as usize),
            device,
        )
        .context("Failed to create OOD input tensor")
    }
}

/// Preprocessor for the classification forward pass.
///
/// Bilinear resize to the model input size followed by scaling to `[0, 1]`.
/// Deliberately independent of [`OodProcessor`].
#[derive(Debug, Clone)]
pub struct ClassifierTransform {
    size: u32,
}

impl ClassifierTransform {
    /// Creates a transform for the given square input size.
    #[must_use]
    pub const fn new(size: u32) -> Self {
        Self { size }
    }

    /// Converts an image to a `(1, 3, size, size)` tensor in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if tensor creation fails.
    pub fn process(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let data = resized_rgb_chw(image, self.size);

        Tensor::from_vec(data, (1, 3, self.size as usize, self.size as usize), device)
            .context("Failed to create classifier input tensor")
    }
}

/// Resizes to `size`x`size` (bilinear) and returns CHW float data in `[0, 1]`.
fn resized_rgb_chw(image: &DynamicImage, size: u32) -> Vec<f32> {
    let resized = image.resize_exact(size, size, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = f32::from(pixel.0[c]) / 255.0;
        }
    }
    data
}
