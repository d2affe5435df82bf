//! Tract backend for segmentation models
//!
//! Pure Rust inference through Tract. Slower than ONNX Runtime but needs no
//! native libraries, which makes it the portable choice for small deployments.
//! A runnable Tract plan can be executed concurrently, so no locking is needed.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::{check_input_shape, InferenceBackend};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
}

impl TractBackend {
    /// List Tract execution providers (CPU only)
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create a Tract backend over the given model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            model_info: None,
        }
    }

    /// Load and optimize the model using Tract
    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;
        let (n, c, h, w) = model_info.input_shape;

        log::info!("🚀 Initializing Tract backend");
        log::info!("🧠 Model: {} ({})", model_info.name, model_info.precision);
        if config.execution_provider != crate::config::ExecutionProvider::Cpu {
            log::debug!(
                "Execution provider '{}' ignored, Tract always runs on CPU",
                config.execution_provider
            );
        }

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .map_err(|e| BgRemovalError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(model);
        self.model_info = Some(model_info);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::inference("Tract model not initialized"))?;
        check_input_shape(input, self.input_shape())?;

        let inference_start = Instant::now();
        let input_tensor = Tensor::from(input.clone());

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_array = output_data
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                BgRemovalError::inference(format!(
                    "Expected 4D output tensor, got shape {:?}: {e}",
                    output_data.shape()
                ))
            })?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output_array.shape()
        );
        Ok(output_array)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or_else(|| (1, 3, 1024, 1024), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or_else(|| (1, 1, 1024, 1024), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        match &self.model_info {
            Some(info) => Ok(info.clone()),
            None => self.model_manager.get_info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::models::{ModelProfile, ModelSpec};
    use std::fs;
    use tempfile::TempDir;

    fn backend_with_file(contents: &[u8]) -> (TempDir, TractBackend) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        fs::write(&path, contents).unwrap();
        let cache = ModelCache::with_custom_cache_dir(dir.path()).unwrap();
        let spec = ModelSpec::external(ModelProfile::Silueta, &path);
        let manager = ModelManager::from_spec(&spec, &cache).unwrap();
        (dir, TractBackend::with_model_manager(manager))
    }

    #[test]
    fn test_tract_backend_starts_uninitialized() {
        let (_dir, backend) = backend_with_file(b"placeholder");
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 1024, 1024));
        assert!(backend.infer(&Array4::zeros((1, 3, 320, 320))).is_err());
    }

    #[test]
    fn test_garbage_model_fails_to_load() {
        let (_dir, mut backend) = backend_with_file(b"definitely not protobuf");
        let err = backend.initialize(&RemovalConfig::default()).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_tract_reports_cpu_only() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, "CPU");
    }

    #[test]
    fn test_preprocessing_comes_from_profile() {
        let (_dir, backend) = backend_with_file(b"placeholder");
        let config = backend.get_preprocessing_config().unwrap();
        assert_eq!(config.target_size, [320, 320]);
    }
}
