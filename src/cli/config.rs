//! Conversion of command-line arguments into service configuration

use super::main_impl::ServeArgs;
use crate::{
    config::RemovalConfig,
    models::{ModelSource, ModelSpec},
    processor::BackendType,
    worker::default_worker_count,
};
use anyhow::{Context, Result};

const MIB: usize = 1024 * 1024;

/// Everything `serve` needs, validated
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendType,
    pub removal: RemovalConfig,
    pub workers: usize,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Build and validate the configuration from `serve` arguments
    ///
    /// # Errors
    /// - `--workers 0` or `--max-upload-mb 0`
    /// - Invalid removal settings (e.g. `--max-dimension 0`)
    pub fn from_args(args: &ServeArgs, debug: bool) -> Result<Self> {
        let model_spec = match &args.model_path {
            Some(path) => ModelSpec::external(args.model, path),
            None => ModelSpec::cached(args.model),
        };

        let removal = RemovalConfig::builder()
            .model_spec(model_spec)
            .execution_provider(args.execution_provider)
            .alpha_matting(args.alpha_matting)
            .max_dimension(args.max_dimension)
            .intra_threads(args.threads)
            .inter_threads(args.threads)
            .debug(debug)
            .build()
            .context("Invalid removal configuration")?;

        let workers = match args.workers {
            Some(0) => anyhow::bail!("--workers must be at least 1"),
            Some(n) => n,
            None => default_worker_count(),
        };

        if args.max_upload_mb == 0 {
            anyhow::bail!("--max-upload-mb must be at least 1");
        }
        let max_upload_bytes = args
            .max_upload_mb
            .checked_mul(MIB)
            .context("--max-upload-mb is too large")?;

        Ok(Self {
            host: args.host.clone(),
            port: args.port,
            backend: args.backend,
            removal,
            workers,
            max_upload_bytes,
        })
    }

    /// `host:port` to bind
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the model file has to come from the cache before loading
    #[must_use]
    pub fn needs_download(&self) -> bool {
        self.backend != BackendType::Mock && self.removal.model_spec.source == ModelSource::Cached
    }
}
