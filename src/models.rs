//! Model profiles and model loading
//!
//! A model profile names one of the supported segmentation networks together
//! with the tensor geometry and normalization it was trained with. The
//! [`ModelManager`] resolves a [`ModelSpec`] into ONNX bytes, either from the
//! local model cache or from an explicit file path.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Base URL the model files are published under
const MODEL_RELEASE_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const UNIT_STD: [f32; 3] = [1.0, 1.0, 1.0];

/// Named segmentation model profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelProfile {
    /// ISNet trained for general-purpose subjects (default)
    IsnetGeneralUse,
    /// ISNet fine-tuned on anime characters
    IsnetAnime,
    /// Original U²-Net salient object model
    U2net,
    /// Lightweight U²-Net variant
    U2netp,
    /// Size-reduced U²-Net
    Silueta,
}

impl ModelProfile {
    /// Every supported profile, in display order
    pub const ALL: [ModelProfile; 5] = [
        ModelProfile::IsnetGeneralUse,
        ModelProfile::IsnetAnime,
        ModelProfile::U2net,
        ModelProfile::U2netp,
        ModelProfile::Silueta,
    ];

    /// Canonical profile name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IsnetGeneralUse => "isnet-general-use",
            Self::IsnetAnime => "isnet-anime",
            Self::U2net => "u2net",
            Self::U2netp => "u2netp",
            Self::Silueta => "silueta",
        }
    }

    /// File name of the model inside the cache directory
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.onnx", self.name())
    }

    /// Download location of the ONNX file
    #[must_use]
    pub fn download_url(self) -> String {
        format!("{}/{}", MODEL_RELEASE_BASE_URL, self.file_name())
    }

    /// Square input edge the network expects
    #[must_use]
    pub fn input_size(self) -> u32 {
        match self {
            Self::IsnetGeneralUse | Self::IsnetAnime => 1024,
            Self::U2net | Self::U2netp | Self::Silueta => 320,
        }
    }

    /// Preprocessing parameters the network was trained with
    #[must_use]
    pub fn preprocessing_config(self) -> PreprocessingConfig {
        let size = self.input_size();
        let normalization_std = match self {
            Self::IsnetGeneralUse | Self::IsnetAnime => UNIT_STD,
            Self::U2net | Self::U2netp | Self::Silueta => IMAGENET_STD,
        };
        PreprocessingConfig {
            target_size: [size, size],
            normalization_mean: IMAGENET_MEAN,
            normalization_std,
        }
    }

    /// Tensor shapes in NCHW order
    #[must_use]
    pub fn tensor_shapes(self) -> ((usize, usize, usize, usize), (usize, usize, usize, usize)) {
        let size = self.input_size() as usize;
        ((1, 3, size, size), (1, 1, size, size))
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::IsnetGeneralUse
    }
}

impl fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelProfile {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|profile| profile.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                BgRemovalError::invalid_config(format!(
                    "Unknown model '{}'. Available models: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Preprocessing configuration for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Input size as `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after max-normalization
    pub normalization_mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub normalization_std: [f32; 3],
}

/// Where the ONNX bytes for a model come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model file stored in the local model cache
    Cached,
    /// Model file at an explicit filesystem path
    External(PathBuf),
}

/// Complete model specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub profile: ModelProfile,
    pub source: ModelSource,
}

impl ModelSpec {
    /// Spec for a profile loaded from the model cache
    #[must_use]
    pub fn cached(profile: ModelProfile) -> Self {
        Self {
            profile,
            source: ModelSource::Cached,
        }
    }

    /// Spec for a profile whose ONNX file lives at `path`
    pub fn external<P: Into<PathBuf>>(profile: ModelProfile, path: P) -> Self {
        Self {
            profile,
            source: ModelSource::External(path.into()),
        }
    }

    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.source {
            ModelSource::Cached => format!("cached:{}", self.profile),
            ModelSource::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::cached(ModelProfile::default())
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Model provider trait for loading models
pub trait ModelProvider: fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    /// - File I/O errors when reading model data
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid preprocessing parameters
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    fn get_model_path(&self) -> Result<PathBuf>;
}

/// Provider for a single ONNX file on disk
#[derive(Debug)]
pub struct FileModelProvider {
    profile: ModelProfile,
    model_path: PathBuf,
}

impl FileModelProvider {
    /// Create a provider for `model_path`, validating that the file exists
    ///
    /// # Errors
    /// - Path does not exist or is not a regular file
    pub fn new<P: AsRef<Path>>(profile: ModelProfile, model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(BgRemovalError::model_error_with_context(
                "locate",
                &model_path,
                "file does not exist",
                &[
                    "run `bgremove-server download` to fetch the model",
                    "pass --model-path pointing at an .onnx file",
                ],
            ));
        }
        Ok(Self {
            profile,
            model_path,
        })
    }

    fn file_size(&self) -> Result<u64> {
        fs::metadata(&self.model_path)
            .map(|meta| meta.len())
            .map_err(|e| BgRemovalError::file_io_error("read metadata of", &self.model_path, &e))
    }
}

impl ModelProvider for FileModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("read model file", &self.model_path, &e))?;
        if data.is_empty() {
            return Err(BgRemovalError::model_error_with_context(
                "load",
                &self.model_path,
                "model file is empty",
                &["delete the file and download it again"],
            ));
        }
        Ok(data)
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let (input_shape, output_shape) = self.profile.tensor_shapes();
        let size_bytes = usize::try_from(self.file_size()?).unwrap_or(usize::MAX);
        Ok(ModelInfo {
            name: self.profile.name().to_string(),
            precision: "fp32".to_string(),
            size_bytes,
            input_shape,
            output_shape,
        })
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.profile.preprocessing_config())
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_path.clone())
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a model manager from a specification
    ///
    /// Cached specs resolve against `cache`; the model must already have been
    /// downloaded.
    ///
    /// # Errors
    /// - Model file missing from the cache or at the external path
    pub fn from_spec(spec: &ModelSpec, cache: &ModelCache) -> Result<Self> {
        let path = match &spec.source {
            ModelSource::Cached => cache.model_file_path(spec.profile),
            ModelSource::External(path) => path.clone(),
        };
        let provider = FileModelProvider::new(spec.profile, path)?;
        Ok(Self::with_provider(Box::new(provider)))
    }

    /// Create a model manager around an arbitrary provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Load model data
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid preprocessing parameters
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    pub fn get_model_path(&self) -> Result<PathBuf> {
        self.provider.get_model_path()
    }
}
