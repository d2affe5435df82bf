//! Inference backend abstraction

use crate::{
    config::RemovalConfig,
    error::Result,
    models::{ModelInfo, PreprocessingConfig},
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// A backend is initialized once and then shared between request workers,
/// so `infer` takes `&self`. Backends whose runtime needs exclusive access to
/// the session serialize internally.
pub trait InferenceBackend: Send + Sync {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time when the backend measured it.
    ///
    /// # Errors
    /// - Backend initialization failures
    /// - Model loading or validation errors
    /// - Invalid configuration parameters
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion or processing errors
    /// - Invalid input tensor dimensions
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Get the expected output shape for this backend
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// Get preprocessing configuration for this backend
    ///
    /// # Errors
    /// - Model manager not initialized
    /// - Invalid or missing preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get model information for this backend
    ///
    /// # Errors
    /// - Model manager not initialized
    /// - Model metadata unavailable or invalid
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Check that `input` matches the shape a backend expects
///
/// # Errors
/// - Dimensions differ from `expected`
pub fn check_input_shape(
    input: &Array4<f32>,
    expected: (usize, usize, usize, usize),
) -> Result<()> {
    let actual = input.dim();
    if actual == expected {
        Ok(())
    } else {
        Err(crate::error::BgRemovalError::inference(format!(
            "Input tensor shape {:?} does not match expected {:?}",
            actual, expected
        )))
    }
}
