#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # bgremove-server
//!
//! HTTP service that removes image backgrounds with ONNX segmentation models.
//!
//! An upload is decoded, rotated per its EXIF orientation, bounded to a
//! maximum side length and passed through a segmentation model. The mask
//! becomes the alpha channel of a PNG cutout. When the model produces nothing
//! usable the normalized input is returned as PNG instead.
//!
//! ## Features
//!
//! - **Model profiles**: `isnet-general-use`, `isnet-anime`, `u2net`, `u2netp`, `silueta`
//! - **Backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust),
//!   plus a mock backend that needs no model file
//! - **Bounded concurrency**: CPU work runs on a semaphore-gated blocking pool
//! - **Model cache**: profiles are downloaded once into `$U2NET_HOME`
//!
//! ## Library usage
//!
//! ```rust,no_run
//! use bgremove_server::{
//!     BackendType, BackgroundRemovalProcessor, ModelCache, RemovalConfig, RemovalPipeline,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let cache = ModelCache::new()?;
//! let config = RemovalConfig::builder().alpha_matting(true).build()?;
//! let processor = BackgroundRemovalProcessor::new(config, BackendType::Onnx, &cache)?;
//! let pipeline = RemovalPipeline::new(Arc::new(processor));
//!
//! let upload = std::fs::read("photo.jpg")?;
//! let result = pipeline.process_upload(&upload)?;
//! std::fs::write("photo.png", &result.png)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `tract` (default): pure Rust backend
//! - `cli` (default): `bgremove-server` binary and tracing subscriber setup
//! - `tracing-json`: JSON log output
//! - `webp-support` (default): WebP uploads

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod server;
pub mod services;
pub mod sieve;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;
pub mod worker;

pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{AlphaMattingConfig, ExecutionProvider, RemovalConfig, RemovalConfigBuilder};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelProfile, ModelSource, ModelSpec};
pub use processor::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory,
    ProcessedImage, ProcessingTimings, RemovalOutcome, RemovalPipeline,
};
pub use server::{create_router, AppState};
pub use services::{ImageIOService, NormalizedImage};
pub use sieve::sieve_of_eratosthenes;
pub use utils::SegmentationMask;
pub use worker::{WorkerError, WorkerPool};
