//! Synthetic image builders for testing.

use anemia_scan_core::domain::ImageInfo;
use image::{DynamicImage, Rgb, RgbImage};

/// Builder for creating synthetic test images.
///
/// Provides convenience methods for generating images that loosely resemble
/// conjunctiva photographs (red-dominant tissue) and clearly
/// out-of-distribution inputs (noise, flat fields).
pub struct SyntheticImageBuilder;

impl SyntheticImageBuilder {
    /// Creates a red-dominant image with a soft vertical gradient,
    /// resembling healthy conjunctival tissue.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn conjunctiva(width: u32, height: u32) -> ImageInfo {
        let img = RgbImage::from_fn(width, height, |_, y| {
            let shade = 150 + ((y * 80) / height.max(1)) as u8;
            Rgb([shade, shade / 3, shade / 3])
        });
        ImageInfo::new("synthetic://conjunctiva", DynamicImage::ImageRgb8(img))
    }

    /// Creates a pale, low-saturation variant of the conjunctiva image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn pale_conjunctiva(width: u32, height: u32) -> ImageInfo {
        let img = RgbImage::from_fn(width, height, |_, y| {
            let shade = 190 + ((y * 40) / height.max(1)) as u8;
            Rgb([shade, shade - 30, shade - 30])
        });
        ImageInfo::new(
            "synthetic://pale_conjunctiva",
            DynamicImage::ImageRgb8(img),
        )
    }

    /// Creates deterministic pseudo-random RGB noise, an archetypal
    /// out-of-distribution input.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn noise(width: u32, height: u32, seed: u64) -> ImageInfo {
        let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            let v = next();
            *pixel = Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8]);
        }
        ImageInfo::new("synthetic://noise", DynamicImage::ImageRgb8(img))
    }

    /// Creates a uniform RGB image.
    #[must_use]
    pub fn rgb_uniform(width: u32, height: u32, r: u8, g: u8, b: u8) -> ImageInfo {
        let img = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        ImageInfo::new("synthetic://rgb_uniform", DynamicImage::ImageRgb8(img))
    }

    /// Creates a 1x1 pixel image (edge case).
    #[must_use]
    pub fn single_pixel(r: u8, g: u8, b: u8) -> ImageInfo {
        Self::rgb_uniform(1, 1, r, g, b)
    }
}
