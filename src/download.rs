//! Model downloading
//!
//! Streams a model file into the cache directory under a temporary name,
//! hashes it on the way, and renames it into place only once the transfer
//! completed (and, when a digest is known, matched).

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::models::ModelProfile;
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Model downloader
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a new model downloader over `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Make sure the profile's model file is in the cache, downloading it if needed
    ///
    /// Returns the path of the cached file.
    ///
    /// # Errors
    /// - Network errors during download
    /// - File system errors during caching
    pub async fn ensure_model(&self, profile: ModelProfile) -> Result<PathBuf> {
        let final_path = self.cache.model_file_path(profile);
        if self.cache.is_model_cached(profile) {
            log::debug!("Model already cached: {}", final_path.display());
            return Ok(final_path);
        }

        log::info!("Downloading model '{}' from {}", profile, profile.download_url());
        self.download_to(&profile.download_url(), &final_path, None)
            .await?;
        Ok(final_path)
    }

    /// Download `url` into `final_path` atomically
    ///
    /// When `expected_sha256` is given the file is only moved into place if
    /// its digest matches.
    ///
    /// # Errors
    /// - Non-success HTTP status
    /// - Digest mismatch
    /// - File system errors
    pub async fn download_to(
        &self,
        url: &str,
        final_path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<String> {
        validate_model_url(url)?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }
        let temp_path = partial_path(final_path);

        let result = self.stream_to_file(url, &temp_path).await;
        let digest = match result {
            Ok(digest) => digest,
            Err(e) => {
                remove_quietly(&temp_path);
                return Err(e);
            },
        };

        if let Some(expected) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                remove_quietly(&temp_path);
                return Err(BgRemovalError::network_error(
                    format!("Integrity check failed for {}", url),
                    format!("expected sha256 {}, got {}", expected, digest),
                ));
            }
        }

        fs::rename(&temp_path, final_path).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model into cache", final_path, &e)
        })?;

        log::info!(
            "Downloaded {} (sha256 {})",
            final_path.display(),
            digest
        );
        Ok(digest)
    }

    /// Stream the response body into `local_path`, returning its SHA-256
    async fn stream_to_file(&self, url: &str, local_path: &Path) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        let mut next_report = 0u64;

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if downloaded >= next_report {
                match total_size {
                    Some(total) => log::debug!("Downloaded {} / {} bytes", downloaded, total),
                    None => log::debug!("Downloaded {} bytes", downloaded),
                }
                next_report = downloaded + 16 * 1024 * 1024;
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {}", url),
                "empty response body",
            ));
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Verify a file against an expected SHA-256 digest
///
/// # Errors
/// - Failed to read the file
pub fn verify_file_integrity(file_path: &Path, expected_hash: &str) -> Result<bool> {
    let contents = fs::read(file_path).map_err(|e| {
        BgRemovalError::file_io_error("read file for verification", file_path, &e)
    })?;

    let actual_hash = format!("{:x}", Sha256::digest(&contents));
    if actual_hash.eq_ignore_ascii_case(expected_hash) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected_hash,
            actual_hash
        );
        Ok(false)
    }
}

/// Validate that a URL can be used as a model source
///
/// # Errors
/// - URL is not `https://` (plain `http://` is accepted for loopback hosts only)
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.starts_with("https://") {
        return Ok(());
    }
    let loopback = ["http://127.0.0.1", "http://localhost", "http://[::1]"];
    if loopback.iter().any(|prefix| url.starts_with(prefix)) {
        return Ok(());
    }
    Err(BgRemovalError::invalid_config(format!(
        "Unsupported model URL: {}. Only https:// sources are allowed.",
        url
    )))
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    final_path.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://github.com/x/y.onnx").is_ok());
        assert!(validate_model_url("http://127.0.0.1:9000/model.onnx").is_ok());
        assert!(validate_model_url("http://example.com/model.onnx").is_err());
        assert!(validate_model_url("ftp://example.com/model.onnx").is_err());
    }

    #[test]
    fn test_partial_path_sits_next_to_target() {
        let path = partial_path(Path::new("/cache/u2net.onnx"));
        assert_eq!(path, PathBuf::from("/cache/u2net.onnx.part"));
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        let good = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_file_integrity(&path, good).unwrap());
        assert!(verify_file_integrity(&path, &good.to_uppercase()).unwrap());
        assert!(!verify_file_integrity(&path, "deadbeef").unwrap());
        assert!(verify_file_integrity(&temp.path().join("missing"), good).is_err());
    }

    #[tokio::test]
    async fn test_ensure_model_skips_cached_file() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let path = cache.model_file_path(ModelProfile::U2netp);
        fs::write(&path, b"already here").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        let resolved = downloader.ensure_model(ModelProfile::U2netp).await.unwrap();
        assert_eq!(resolved, path);
        assert_eq!(fs::read(&resolved).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_download_rejects_insecure_url_without_touching_disk() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        let target = temp.path().join("model.onnx");

        let err = downloader
            .download_to("http://example.com/model.onnx", &target, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }
}
