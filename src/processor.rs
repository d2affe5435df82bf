//! Background removal processor and upload pipeline
//!
//! [`BackgroundRemovalProcessor`] owns the loaded model and turns a bitmap
//! into a cutout. It is created once at startup and shared behind an `Arc`.
//! [`RemovalPipeline`] wraps it with the upload contract: decode, orient,
//! bound the size, remove the background, and fall back to the normalized
//! input when the model produces nothing.

use crate::{
    backends::MockBackend,
    cache::ModelCache,
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelSpec, PreprocessingConfig},
    services::{ImageIOService, NormalizedImage},
    utils::{apply_mask, refine_alpha_matting, tensor_to_mask, ImagePreprocessor, SegmentationMask},
};
use image::DynamicImage;
use instant::{Duration, Instant};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, span, warn, Level};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// Deterministic mock masks, no model file required
    Mock,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            "mock" => Ok(Self::Mock),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{}'. Expected one of: onnx, tract, mock",
                other
            ))),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of `backend_type` for the model in `spec`
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    /// - Model file missing
    fn create_backend(
        &self,
        backend_type: BackendType,
        spec: &ModelSpec,
        cache: &ModelCache,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Backend factory covering every backend enabled at compile time
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        spec: &ModelSpec,
        cache: &ModelCache,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => {
                let manager = crate::models::ModelManager::from_spec(spec, cache)?;
                Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                    manager,
                )))
            },
            #[cfg(feature = "tract")]
            BackendType::Tract => {
                let manager = crate::models::ModelManager::from_spec(spec, cache)?;
                Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                    manager,
                )))
            },
            BackendType::Mock => Ok(Box::new(MockBackend::new(spec.profile))),
            #[allow(unreachable_patterns)]
            other => {
                let _ = cache;
                Err(BgRemovalError::invalid_config(format!(
                    "Backend '{}' is not enabled in this build",
                    other
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Per-stage timings of one removal, in milliseconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub postprocessing_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Background removal processor holding the loaded model
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend: Box<dyn InferenceBackend>,
    preprocessing: PreprocessingConfig,
    model_name: String,
    model_load_time: Option<Duration>,
}

impl fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("model", &self.model_name)
            .field("alpha_matting", &self.config.alpha_matting)
            .field("max_dimension", &self.config.max_dimension)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Load the configured model with the default backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Model missing or failing to load
    pub fn new(config: RemovalConfig, backend_type: BackendType, cache: &ModelCache) -> Result<Self> {
        Self::with_factory(config, backend_type, cache, &DefaultBackendFactory)
    }

    /// Load the configured model through a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend creation or initialization failures
    pub fn with_factory(
        config: RemovalConfig,
        backend_type: BackendType,
        cache: &ModelCache,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            backend = %backend_type,
            model = %config.model_spec.display_name(),
            provider = %config.execution_provider,
            "Loading segmentation model"
        );
        let backend = factory.create_backend(backend_type, &config.model_spec, cache)?;
        Self::with_backend(config, backend)
    }

    /// Wrap an already constructed backend, initializing it if needed
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend initialization failures
    pub fn with_backend(config: RemovalConfig, mut backend: Box<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;

        let model_load_time = if backend.is_initialized() {
            None
        } else {
            backend.initialize(&config)?
        };
        let preprocessing = backend.get_preprocessing_config()?;
        let model_name = backend.get_model_info()?.name;

        info!(
            model = %model_name,
            input = ?preprocessing.target_size,
            load_ms = model_load_time.map(millis),
            "Segmentation model ready"
        );

        Ok(Self {
            config,
            backend,
            preprocessing,
            model_name,
            model_load_time,
        })
    }

    /// Predict the foreground mask for `image` at its own resolution
    ///
    /// Returns `Ok(None)` when the model produced no usable prediction.
    ///
    /// # Errors
    /// - Preprocessing, inference or mask conversion failures
    pub fn segment(
        &self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<Option<SegmentationMask>> {
        let dimensions = (image.width(), image.height());

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let start = Instant::now();
            let tensor = ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing)?;
            timings.preprocessing_ms = millis(start.elapsed());
            tensor
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference", model = %self.model_name).entered();
            let start = Instant::now();
            let output = self.backend.infer(&input_tensor)?;
            timings.inference_ms = millis(start.elapsed());
            output
        };

        let _span = span!(Level::DEBUG, "mask").entered();
        tensor_to_mask(&output_tensor, dimensions)
    }

    /// Remove the background of `image`, returning PNG bytes
    ///
    /// Returns `Ok(None)` when the model produced nothing usable; callers
    /// decide how to recover.
    ///
    /// # Errors
    /// - Inference failures
    /// - Mask application or PNG encoding failures
    #[instrument(
        skip(self, image, timings),
        fields(
            model = %self.model_name,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn remove(
        &self,
        image: &DynamicImage,
        alpha_matting: bool,
        timings: &mut ProcessingTimings,
    ) -> Result<Option<Vec<u8>>> {
        let Some(mask) = self.segment(image, timings)? else {
            return Ok(None);
        };

        let postprocess_start = Instant::now();
        let mask = if alpha_matting {
            refine_alpha_matting(&mask, &self.config.alpha_matting_config)?
        } else {
            mask
        };
        let cutout = apply_mask(image, &mask)?;
        timings.postprocessing_ms = millis(postprocess_start.elapsed());
        debug!(coverage = mask.coverage(), "Mask applied");

        let encode_start = Instant::now();
        let png = ImageIOService::encode_png(&DynamicImage::ImageRgba8(cutout))?;
        timings.encode_ms = millis(encode_start.elapsed());

        if png.is_empty() {
            return Ok(None);
        }
        Ok(Some(png))
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Name of the loaded model
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Time spent loading the model, when the backend measured it
    #[must_use]
    pub fn model_load_time(&self) -> Option<Duration> {
        self.model_load_time
    }
}

/// How a processed upload was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalOutcome {
    /// Background removed by the model
    Removed,
    /// Model produced nothing; the normalized input was re-encoded
    Fallback,
}

/// Result of processing one upload
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// PNG bytes, never empty
    pub png: Vec<u8>,
    pub outcome: RemovalOutcome,
    /// Output dimensions as `(width, height)`
    pub dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

/// Upload pipeline around a shared processor
#[derive(Debug, Clone)]
pub struct RemovalPipeline {
    processor: Arc<BackgroundRemovalProcessor>,
}

impl RemovalPipeline {
    #[must_use]
    pub fn new(processor: Arc<BackgroundRemovalProcessor>) -> Self {
        Self { processor }
    }

    /// The shared processor
    #[must_use]
    pub fn processor(&self) -> &Arc<BackgroundRemovalProcessor> {
        &self.processor
    }

    /// Turn uploaded bytes into a PNG cutout
    ///
    /// An empty model result is recovered by re-encoding the normalized
    /// input; every other failure is returned.
    ///
    /// # Errors
    /// - `BgRemovalError::Decode` for bytes that are not an image
    /// - Inference and encoding failures
    pub fn process_upload(&self, bytes: &[u8]) -> Result<ProcessedImage> {
        let total_start = Instant::now();
        let config = self.processor.config();
        let mut timings = ProcessingTimings::default();

        let decode_start = Instant::now();
        let normalized = {
            let _span = span!(Level::DEBUG, "decode", upload_bytes = bytes.len()).entered();
            ImageIOService::normalize_upload(bytes, config.max_dimension)?
        };
        timings.decode_ms = millis(decode_start.elapsed());

        let removed = self
            .processor
            .remove(&normalized.image, config.alpha_matting, &mut timings)?;

        let (png, outcome) = match removed {
            Some(png) => (png, RemovalOutcome::Removed),
            None => (Self::fallback(&normalized, &mut timings)?, RemovalOutcome::Fallback),
        };
        timings.total_ms = millis(total_start.elapsed());

        let dimensions = normalized.dimensions();
        info!(
            outcome = ?outcome,
            width = dimensions.0,
            height = dimensions.1,
            resized = normalized.resized,
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            "Upload processed"
        );

        Ok(ProcessedImage {
            png,
            outcome,
            dimensions,
            timings,
        })
    }

    fn fallback(normalized: &NormalizedImage, timings: &mut ProcessingTimings) -> Result<Vec<u8>> {
        warn!(
            width = normalized.image.width(),
            height = normalized.image.height(),
            "Model returned no result, returning normalized input"
        );
        let encode_start = Instant::now();
        let png = ImageIOService::encode_png(&normalized.image)?;
        timings.encode_ms = millis(encode_start.elapsed());
        Ok(png)
    }
}
