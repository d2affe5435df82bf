//! Mask extraction, alpha matting and cutout composition

use crate::config::AlphaMattingConfig;
use crate::error::{BgRemovalError, Result};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbaImage};
use ndarray::Array4;

/// Predictions whose value range is narrower than this carry no segmentation
const MIN_PREDICTION_RANGE: f32 = 1e-6;

/// Single-channel alpha mask at image resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Row-major alpha values, one byte per pixel
    pub data: Vec<u8>,
    /// Mask dimensions as `(width, height)`
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Wrap raw mask bytes, checking they cover `dimensions`
    ///
    /// # Errors
    /// - Data length does not equal `width * height`
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Result<Self> {
        let expected = (dimensions.0 as usize).saturating_mul(dimensions.1 as usize);
        if data.len() != expected {
            return Err(BgRemovalError::processing(format!(
                "Mask has {} values but {}x{} needs {}",
                data.len(),
                dimensions.0,
                dimensions.1,
                expected
            )));
        }
        Ok(Self { data, dimensions })
    }

    fn from_gray(image: GrayImage) -> Self {
        let dimensions = image.dimensions();
        Self {
            data: image.into_raw(),
            dimensions,
        }
    }

    fn to_gray(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.dimensions.0, self.dimensions.1, self.data.clone())
            .ok_or_else(|| BgRemovalError::processing("Mask buffer does not match its dimensions"))
    }

    /// Fraction of pixels with any opacity
    #[must_use]
    pub fn coverage(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let opaque = self.data.iter().filter(|&&v| v > 0).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = opaque as f32 / self.data.len() as f32;
        ratio
    }
}

/// Convert the raw network output into a mask at `target_dimensions`
///
/// Returns `Ok(None)` when the prediction is flat or not finite, which means
/// the model produced nothing usable for this image.
///
/// # Errors
/// - Output tensor has no spatial extent
pub fn tensor_to_mask(
    output: &Array4<f32>,
    target_dimensions: (u32, u32),
) -> Result<Option<SegmentationMask>> {
    let (_, channels, height, width) = output.dim();
    if channels == 0 || height == 0 || width == 0 {
        return Err(BgRemovalError::processing_stage_error(
            "postprocess",
            "model output has no mask channel",
            Some(&format!("{:?}", output.dim())),
        ));
    }

    let prediction = output.slice(ndarray::s![0, 0, .., ..]);
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &value in &prediction {
        if !value.is_finite() {
            log::debug!("Model output contains non-finite values");
            return Ok(None);
        }
        min = min.min(value);
        max = max.max(value);
    }
    let range = max - min;
    if range < MIN_PREDICTION_RANGE {
        log::debug!("Model output is flat ({min})");
        return Ok(None);
    }

    let mask_width = u32::try_from(width)
        .map_err(|_| BgRemovalError::processing("Mask width exceeds u32"))?;
    let mask_height = u32::try_from(height)
        .map_err(|_| BgRemovalError::processing("Mask height exceeds u32"))?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pixels: Vec<u8> = prediction
        .iter()
        .map(|&value| (((value - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let small = GrayImage::from_raw(mask_width, mask_height, pixels)
        .ok_or_else(|| BgRemovalError::processing("Failed to build mask image"))?;

    let (target_width, target_height) = target_dimensions;
    let resized = if small.dimensions() == target_dimensions {
        small
    } else {
        image::imageops::resize(&small, target_width, target_height, FilterType::Lanczos3)
    };

    Ok(Some(SegmentationMask::from_gray(resized)))
}

/// Refine mask edges with a trimap
///
/// Pixels at or above the foreground threshold become sure foreground and
/// pixels at or below the background threshold sure background; both regions
/// are eroded by `erode_size` so the uncertain band widens around the edge.
/// The band takes a blurred copy of the mask, while sure regions are forced
/// to 255 and 0.
///
/// # Errors
/// - Mask buffer inconsistent with its dimensions
pub fn refine_alpha_matting(
    mask: &SegmentationMask,
    config: &AlphaMattingConfig,
) -> Result<SegmentationMask> {
    let gray = mask.to_gray()?;
    let (width, height) = gray.dimensions();

    let foreground: Vec<bool> = mask
        .data
        .iter()
        .map(|&v| v >= config.foreground_threshold)
        .collect();
    let background: Vec<bool> = mask
        .data
        .iter()
        .map(|&v| v <= config.background_threshold)
        .collect();
    let radius = config.erode_size as usize;
    let sure_foreground = erode(&foreground, width as usize, height as usize, radius);
    let sure_background = erode(&background, width as usize, height as usize, radius);

    #[allow(clippy::cast_precision_loss)]
    let sigma = (config.erode_size.max(1) as f32) / 2.0;
    let smoothed = image::imageops::blur(&gray, sigma);

    let data = smoothed
        .into_raw()
        .into_iter()
        .zip(sure_foreground.iter().zip(&sure_background))
        .map(|(soft, (&fg, &bg))| {
            if fg {
                u8::MAX
            } else if bg {
                0
            } else {
                soft
            }
        })
        .collect();

    SegmentationMask::new(data, (width, height))
}

/// Binary erosion with a square window of the given radius
///
/// A pixel survives when every pixel in its window (clipped to the image)
/// is set.
fn erode(mask: &[bool], width: usize, height: usize, radius: usize) -> Vec<bool> {
    if radius == 0 || width == 0 || height == 0 {
        return mask.to_vec();
    }

    let horizontal = erode_lines(mask, width, height, radius, true);
    erode_lines(&horizontal, width, height, radius, false)
}

fn erode_lines(
    mask: &[bool],
    width: usize,
    height: usize,
    radius: usize,
    along_rows: bool,
) -> Vec<bool> {
    let (lines, length) = if along_rows {
        (height, width)
    } else {
        (width, height)
    };
    let index = |line: usize, pos: usize| {
        if along_rows {
            line * width + pos
        } else {
            pos * width + line
        }
    };

    let mut out = vec![false; mask.len()];
    for line in 0..lines {
        // prefix[k] counts set cells in 0..k
        let prefix: Vec<usize> = std::iter::once(0)
            .chain((0..length).scan(0usize, |count, pos| {
                *count += usize::from(mask.get(index(line, pos)).copied().unwrap_or(false));
                Some(*count)
            }))
            .collect();
        let set_in = |start: usize, end: usize| -> usize {
            match (prefix.get(end), prefix.get(start)) {
                (Some(hi), Some(lo)) => hi - lo,
                _ => 0,
            }
        };
        for pos in 0..length {
            let start = pos.saturating_sub(radius);
            let end = (pos + radius + 1).min(length);
            if set_in(start, end) == end - start {
                if let Some(slot) = out.get_mut(index(line, pos)) {
                    *slot = true;
                }
            }
        }
    }
    out
}

/// RGBA copy of `image` with its own alpha scaled by the mask
///
/// # Errors
/// - Mask and image dimensions differ
pub fn apply_mask(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let mut rgba = image.to_rgba8();
    if rgba.dimensions() != mask.dimensions {
        return Err(BgRemovalError::processing(format!(
            "Mask is {}x{} but image is {}x{}",
            mask.dimensions.0,
            mask.dimensions.1,
            rgba.width(),
            rgba.height()
        )));
    }

    for (pixel, &alpha) in rgba.pixels_mut().zip(&mask.data) {
        pixel.0[3] = scale_alpha(pixel.0[3], alpha);
    }
    Ok(rgba)
}

/// `a * b / 255`, rounded
fn scale_alpha(a: u8, b: u8) -> u8 {
    let product = (u16::from(a) * u16::from(b) + 127) / 255;
    u8::try_from(product).unwrap_or(u8::MAX)
}
