//! Background removal service CLI
//!
//! `serve` is the default command; the other subcommands manage the model
//! cache or run the prime sieve.

use super::config::ServerConfig;
use crate::{
    cache::{format_size, ModelCache},
    download::ModelDownloader,
    models::ModelProfile,
    processor::{BackgroundRemovalProcessor, RemovalPipeline},
    server::{self, AppState},
    sieve::sieve_of_eratosthenes,
    tracing_config::{init_service_tracing, TracingFormat},
    worker::WorkerPool,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// HTTP service that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format (console, compact, json)
    #[arg(long, default_value = "console", global = true)]
    pub log_format: TracingFormat,

    /// Use custom model cache directory
    #[arg(long, env = "U2NET_HOME", value_name = "PATH", global = true)]
    pub cache_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the model and serve HTTP requests (default)
    Serve(ServeArgs),
    /// Download a model into the cache and exit
    Download {
        /// Model profile to download
        #[arg(short, long, env = "BGREMOVE_MODEL", default_value = "isnet-general-use")]
        model: ModelProfile,
    },
    /// List cached models and exit
    ListModels,
    /// Clear cached models (all of them unless --model is given)
    ClearCache {
        /// Only remove this model profile
        #[arg(short, long)]
        model: Option<ModelProfile>,
    },
    /// Show backends and execution providers available in this build
    Providers,
    /// Print every prime up to N
    Primes {
        /// Upper bound (inclusive)
        n: usize,
    },
}

/// Options of the `serve` command
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "BGREMOVE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Segmentation model profile
    #[arg(short, long, env = "BGREMOVE_MODEL", default_value = "isnet-general-use")]
    pub model: ModelProfile,

    /// Load the model from this ONNX file instead of the cache
    #[arg(long, env = "BGREMOVE_MODEL_PATH", value_name = "FILE")]
    pub model_path: Option<PathBuf>,

    /// Inference backend (onnx, tract, mock)
    #[arg(short, long, env = "BGREMOVE_BACKEND", default_value = "onnx")]
    pub backend: crate::processor::BackendType,

    /// ONNX execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, env = "BGREMOVE_EXECUTION_PROVIDER", default_value = "auto")]
    pub execution_provider: crate::config::ExecutionProvider,

    /// Refine mask edges with trimap alpha matting
    #[arg(long, env = "BGREMOVE_ALPHA_MATTING")]
    pub alpha_matting: bool,

    /// Longest side an upload keeps before being downscaled
    #[arg(long, env = "BGREMOVE_MAX_DIMENSION", default_value_t = crate::config::DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,

    /// Concurrent processing workers [default: available parallelism]
    #[arg(short, long, env = "BGREMOVE_WORKERS")]
    pub workers: Option<usize>,

    /// Largest accepted request body in MiB
    #[arg(long, env = "BGREMOVE_MAX_UPLOAD_MB", default_value_t = 25)]
    pub max_upload_mb: usize,

    /// Threads per inference run (0 = runtime default)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,
}

/// Parse arguments and run the selected command
///
/// # Errors
/// - Invalid arguments or configuration
/// - Model download or load failures
/// - Listener I/O errors
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_service_tracing(cli.verbose, cli.log_format).context("Failed to initialize tracing")?;

    match &cli.command {
        None => run_server(&cli, &cli.serve).await,
        Some(Command::Serve(args)) => run_server(&cli, args).await,
        Some(Command::Download { model }) => download_model(&cli, *model).await,
        Some(Command::ListModels) => list_cached_models(&cli),
        Some(Command::ClearCache { model }) => clear_cache_models(&cli, *model),
        Some(Command::Providers) => {
            show_providers();
            Ok(())
        },
        Some(Command::Primes { n }) => {
            print_primes(*n);
            Ok(())
        },
    }
}

fn open_cache(cli: &Cli) -> Result<ModelCache> {
    let dir = ModelCache::resolve_cache_dir(cli.cache_dir.as_deref())
        .context("Failed to resolve model cache directory")?;
    ModelCache::with_custom_cache_dir(&dir).context("Failed to open model cache")
}

async fn run_server(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let config = ServerConfig::from_args(args, cli.verbose >= 2).context("Invalid configuration")?;
    let cache = open_cache(cli)?;

    info!(
        backend = %config.backend,
        model = %config.removal.model_spec.display_name(),
        workers = config.workers,
        max_upload_bytes = config.max_upload_bytes,
        "Starting background removal service"
    );

    if config.needs_download() {
        let downloader =
            ModelDownloader::new(cache.clone()).context("Failed to create model downloader")?;
        downloader
            .ensure_model(config.removal.model_spec.profile)
            .await
            .context("Failed to make the model available")?;
    }

    let removal = config.removal.clone();
    let backend = config.backend;
    let processor = tokio::task::spawn_blocking(move || {
        BackgroundRemovalProcessor::new(removal, backend, &cache)
    })
    .await
    .context("Model loading task failed")?
    .context("Failed to load segmentation model")?;

    let pipeline = RemovalPipeline::new(Arc::new(processor));
    let workers = WorkerPool::new(config.workers);
    let router = server::create_router(AppState::new(pipeline, workers.clone()), config.max_upload_bytes);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    server::serve(listener, router, workers)
        .await
        .context("Server error")
}

async fn download_model(cli: &Cli, profile: ModelProfile) -> Result<()> {
    let cache = open_cache(cli)?;
    let downloader = ModelDownloader::new(cache).context("Failed to create model downloader")?;

    println!("📦 Downloading model '{}' from {}", profile, profile.download_url());
    let path = downloader
        .ensure_model(profile)
        .await
        .with_context(|| format!("Failed to download model '{profile}'"))?;
    println!("✅ Model ready: {}", path.display());
    Ok(())
}

fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached models in {}", cache.get_current_cache_dir().display());
    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download a model, use:");
        println!("  bgremove-server download --model isnet-general-use");
        return Ok(());
    }

    for model in models {
        println!("  • {} ({})", model.profile, format_size(model.size_bytes));
    }
    Ok(())
}

fn clear_cache_models(cli: &Cli, profile: Option<ModelProfile>) -> Result<()> {
    let cache = open_cache(cli)?;

    if let Some(profile) = profile {
        if cache
            .clear_specific_model(profile)
            .with_context(|| format!("Failed to clear model '{profile}'"))?
        {
            println!("✅ Removed model: {profile}");
        } else {
            warn!(model = %profile, "Model not found in cache");
            println!("⚠️  Model '{profile}' not found in cache");
        }
    } else {
        let removed = cache.clear_all_models().context("Failed to clear cache")?;
        if removed.is_empty() {
            println!("💡 Cache was already empty");
        } else {
            println!("✅ Removed {} model(s):", removed.len());
            for profile in &removed {
                println!("   • {profile}");
            }
        }
    }

    println!("   Cache location: {}", cache.get_current_cache_dir().display());
    Ok(())
}

fn show_providers() {
    use crate::processor::{BackendFactory, DefaultBackendFactory};

    println!("🔧 Backends:");
    for backend in DefaultBackendFactory.available_backends() {
        println!("  • {backend}");
    }

    #[cfg(feature = "onnx")]
    print_provider_table("onnx", crate::backends::OnnxBackend::list_providers());
    #[cfg(feature = "tract")]
    print_provider_table("tract", crate::backends::TractBackend::list_providers());
}

#[cfg(any(feature = "onnx", feature = "tract"))]
fn print_provider_table(backend: &str, providers: Vec<(String, bool, String)>) {
    println!("\n🚀 {backend} execution providers:");
    for (name, available, description) in providers {
        let status = if available { "✅ Available" } else { "❌ Not Available" };
        println!("  • {name}: {status} - {description}");
    }
}

fn print_primes(n: usize) {
    let primes = sieve_of_eratosthenes(n);
    let line = primes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::BackendType;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["bgremove-server", "--port", "9100", "--backend", "mock"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, 9100);
        assert_eq!(cli.serve.backend, BackendType::Mock);
    }

    #[test]
    fn test_explicit_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "bgremove-server",
            "serve",
            "--model",
            "u2netp",
            "--alpha-matting",
            "--workers",
            "3",
        ])
        .unwrap();
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.model, ModelProfile::U2netp);
        assert!(args.alpha_matting);
        assert_eq!(args.workers, Some(3));
    }

    #[test]
    fn test_primes_subcommand() {
        let cli = Cli::try_parse_from(["bgremove-server", "primes", "30"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Primes { n: 30 })));
    }

    #[test]
    fn test_clear_cache_with_model() {
        let cli = Cli::try_parse_from(["bgremove-server", "clear-cache", "--model", "silueta"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::ClearCache {
                model: Some(ModelProfile::Silueta)
            })
        ));
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        assert!(Cli::try_parse_from(["bgremove-server", "--backend", "torch"]).is_err());
        assert!(Cli::try_parse_from(["bgremove-server", "--model", "sam"]).is_err());
        assert!(Cli::try_parse_from(["bgremove-server", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bgremove-server", "list-models", "-vv", "--cache-dir", "/tmp/models"]).unwrap();
        assert!(matches!(cli.command, Some(Command::ListModels)));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.cache_dir.as_deref(), Some("/tmp/models"));
    }
}
