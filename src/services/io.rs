//! Image I/O for uploads
//!
//! Decoding, orientation and size normalization of uploaded bytes, and PNG
//! encoding of results. Kept apart from the inference path so it can be
//! tested without a model.

use crate::error::{BgRemovalError, Result};
use image::{imageops::FilterType, DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Upload after decoding, orientation and downscaling
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// RGBA bitmap, upright, longest side within the configured bound
    pub image: DynamicImage,
    /// Upright dimensions before downscaling, as `(width, height)`
    pub original_dimensions: (u32, u32),
    /// Whether the image was downscaled
    pub resized: bool,
}

impl NormalizedImage {
    /// Current dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Service for decoding uploads and encoding results
pub struct ImageIOService;

impl ImageIOService {
    /// Decode an upload, apply EXIF orientation and bound its longest side
    ///
    /// # Errors
    /// - `BgRemovalError::Decode` when the bytes are not a supported image
    pub fn normalize_upload(bytes: &[u8], max_dimension: u32) -> Result<NormalizedImage> {
        let upright = Self::decode_oriented(bytes)?;
        let original_dimensions = (upright.width(), upright.height());
        let (image, resized) = Self::fit_within(upright, max_dimension);

        if resized {
            log::debug!(
                "Downscaled upload from {}x{} to {}x{}",
                original_dimensions.0,
                original_dimensions.1,
                image.width(),
                image.height()
            );
        }

        Ok(NormalizedImage {
            image,
            original_dimensions,
            resized,
        })
    }

    /// Decode bytes into an upright RGBA bitmap
    ///
    /// # Errors
    /// - Empty input, unknown format or corrupt data (`BgRemovalError::Decode`)
    pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgRemovalError::decode("upload is empty"));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| BgRemovalError::decode(format!("failed to read upload: {e}")))?;
        let format = reader
            .format()
            .ok_or_else(|| BgRemovalError::decode("unrecognized image format"))?;

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| BgRemovalError::decode(format!("invalid {format:?} data: {e}")))?;
        let orientation = decoder
            .orientation()
            .map_err(|e| BgRemovalError::decode(format!("invalid {format:?} metadata: {e}")))?;
        let mut image = DynamicImage::from_decoder(decoder)
            .map_err(|e| BgRemovalError::decode(format!("invalid {format:?} data: {e}")))?;

        image.apply_orientation(orientation);
        log::debug!(
            "Decoded {:?} upload {}x{} ({:?})",
            format,
            image.width(),
            image.height(),
            orientation
        );

        Ok(DynamicImage::ImageRgba8(image.into_rgba8()))
    }

    /// Downscale so the longest side is at most `max_dimension`
    ///
    /// Aspect ratio is preserved and images are never enlarged. Returns the
    /// image and whether it changed.
    #[must_use]
    pub fn fit_within(image: DynamicImage, max_dimension: u32) -> (DynamicImage, bool) {
        if image.width() <= max_dimension && image.height() <= max_dimension {
            return (image, false);
        }
        let resized = image.resize(max_dimension, max_dimension, FilterType::Lanczos3);
        (resized, true)
    }

    /// Encode an image as PNG, keeping its alpha channel
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).map_err(|e| {
            BgRemovalError::processing_stage_error(
                "encode",
                &format!("PNG encoding failed: {e}"),
                Some(&format!("{}x{}", image.width(), image.height())),
            )
        })?;
        Ok(buffer.into_inner())
    }
}
