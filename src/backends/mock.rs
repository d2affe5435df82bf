//! Mock backend for tests and local development
//!
//! Produces deterministic masks without a model file, so the full upload
//! pipeline and HTTP surface can be exercised offline.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::{check_input_shape, InferenceBackend};
use crate::models::{ModelInfo, ModelProfile, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What the mock network predicts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockOutput {
    /// Bright disc in the centre fading to zero at the edges
    CenteredBlob,
    /// Same value everywhere, which carries no segmentation signal
    Constant(f32),
    /// Every inference call fails
    Failure,
}

/// Mock backend for testing purposes
#[derive(Debug)]
pub struct MockBackend {
    profile: ModelProfile,
    output: MockOutput,
    initialized: bool,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Mock that predicts a centred foreground object
    #[must_use]
    pub fn new(profile: ModelProfile) -> Self {
        Self::with_output(profile, MockOutput::CenteredBlob)
    }

    /// Mock with explicit prediction behaviour
    #[must_use]
    pub fn with_output(profile: ModelProfile, output: MockOutput) -> Self {
        Self {
            profile,
            output,
            initialized: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of inference calls served so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        let start = Instant::now();
        self.initialized = true;
        Ok(Some(start.elapsed()))
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(BgRemovalError::internal("Backend not initialized"));
        }
        check_input_shape(input, self.input_shape())?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let (n, _c, h, w) = input.dim();
        match self.output {
            MockOutput::Failure => Err(BgRemovalError::inference("mock inference failure")),
            MockOutput::Constant(value) => Ok(Array4::from_elem((n, 1, h, w), value)),
            MockOutput::CenteredBlob => {
                #[allow(clippy::cast_precision_loss)]
                let (cy, cx) = (h as f32 / 2.0, w as f32 / 2.0);
                let radius = cy.min(cx).max(1.0);
                Ok(Array4::from_shape_fn((n, 1, h, w), |(_, _, y, x)| {
                    #[allow(clippy::cast_precision_loss)]
                    let (dy, dx) = (y as f32 + 0.5 - cy, x as f32 + 0.5 - cx);
                    let distance = (dy * dy + dx * dx).sqrt() / radius;
                    (1.0 - distance).clamp(0.0, 1.0)
                }))
            },
        }
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.profile.tensor_shapes().0
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.profile.tensor_shapes().1
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.profile.preprocessing_config())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let (input_shape, output_shape) = self.profile.tensor_shapes();
        Ok(ModelInfo {
            name: format!("mock-{}", self.profile),
            precision: "mock".to_string(),
            size_bytes: 0,
            input_shape,
            output_shape,
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
