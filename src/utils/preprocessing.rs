//! Image preprocessing for segmentation inference
//!
//! The image is stretched to the square network input (aspect ratio is not
//! preserved; the mask is stretched back afterwards), scaled by its brightest
//! channel value, then normalized per channel into an NCHW tensor.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Smallest divisor used when scaling by the brightest value
const MIN_SCALE: f32 = 1e-6;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess image for model inference
    ///
    /// # Errors
    /// - Empty image
    /// - Target size does not fit in memory indices
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::processing_stage_error(
                "preprocess",
                "image has no pixels",
                Some(&format!("{}x{}", image.width(), image.height())),
            ));
        }

        let [target_width, target_height] = preprocessing_config.target_size;
        let resized = image::imageops::resize(
            &image.to_rgb8(),
            target_width,
            target_height,
            FilterType::Lanczos3,
        );

        Self::image_to_tensor(&resized, preprocessing_config)
    }

    /// Convert an already resized RGB image into a normalized tensor
    fn image_to_tensor(
        image: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let width = usize::try_from(image.width())
            .map_err(|_| BgRemovalError::processing("Image width exceeds usize"))?;
        let height = usize::try_from(image.height())
            .map_err(|_| BgRemovalError::processing("Image height exceeds usize"))?;

        let brightest = image.as_raw().iter().copied().max().unwrap_or(0);
        let scale = f32::from(brightest).max(MIN_SCALE);
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
        for (x, y, pixel) in image.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                let normalized = (f32::from(*value) / scale
                    - mean.get(channel).copied().unwrap_or(0.0))
                    / std.get(channel).copied().unwrap_or(1.0);
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = normalized;
                }
            }
        }

        Ok(tensor)
    }
}
