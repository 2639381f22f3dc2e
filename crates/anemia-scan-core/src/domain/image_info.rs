//! Decoded image plus provenance metadata.

/// Basic image information extracted during loading.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Path or identifier of the image source.
    pub path: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Decoded image data.
    pub image: image::DynamicImage,
}

impl ImageInfo {
    /// Creates image info from a decoded image.
    #[must_use]
    pub fn new(path: impl Into<String>, image: image::DynamicImage) -> Self {
        let width = image.width();
        let height = image.height();
        Self {
            path: path.into(),
            width,
            height,
            image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_from_image() {
        let img = image::DynamicImage::new_rgb8(64, 48);
        let info = ImageInfo::new("test.png", img);
        assert_eq!(info.width, 64);
        assert_eq!(info.height, 48);
        assert_eq!(info.path, "test.png");
    }
}
