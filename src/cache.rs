//! Model cache management for downloaded models
//!
//! Models are stored as flat `<profile>.onnx` files in a single directory.
//! The directory honours the `U2NET_HOME` override and otherwise lives under
//! the platform cache directory.

use crate::error::{BgRemovalError, Result};
use crate::models::ModelProfile;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache directory
pub const CACHE_DIR_ENV: &str = "U2NET_HOME";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Profile the cached file belongs to
    pub profile: ModelProfile,
    /// Path to the cached model file
    pub path: PathBuf,
    /// Size of the model file in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache manager
    ///
    /// Uses `$U2NET_HOME` when set, otherwise:
    /// - Linux: `~/.cache/bgremove-server/models/`
    /// - macOS: `~/Library/Caches/bgremove-server/models/`
    /// - Windows: `%LOCALAPPDATA%/bgremove-server/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let override_dir = std::env::var(CACHE_DIR_ENV).ok();
        let cache_dir = Self::resolve_cache_dir(override_dir.as_deref())?;
        Self::with_custom_cache_dir(&cache_dir)
    }

    /// Create a cache manager rooted at `cache_dir`
    ///
    /// # Errors
    /// - Failed to create the directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", cache_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Resolve the cache directory from an optional override
    ///
    /// # Errors
    /// - No override given and the platform cache directory is unknown
    pub fn resolve_cache_dir(override_dir: Option<&str>) -> Result<PathBuf> {
        if let Some(dir) = override_dir.filter(|d| !d.trim().is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set the {} environment variable.",
                    CACHE_DIR_ENV
                ))
            })?
            .join("bgremove-server")
            .join("models"))
    }

    /// Path a profile's model file is stored at (may not exist)
    #[must_use]
    pub fn model_file_path(&self, profile: ModelProfile) -> PathBuf {
        self.cache_dir.join(profile.file_name())
    }

    /// Check if a model is cached and non-empty
    #[must_use]
    pub fn is_model_cached(&self, profile: ModelProfile) -> bool {
        fs::metadata(self.model_file_path(profile))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Scan the cache directory for known model files
    ///
    /// # Errors
    /// - Failed to read file metadata
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        for profile in ModelProfile::ALL {
            let path = self.model_file_path(profile);
            if !path.is_file() {
                continue;
            }
            let size_bytes = fs::metadata(&path)
                .map_err(|e| BgRemovalError::file_io_error("read metadata of", &path, &e))?
                .len();
            models.push(CachedModelInfo {
                profile,
                path,
                size_bytes,
            });
        }

        Ok(models)
    }

    /// Remove every cached model file, returning the profiles removed
    ///
    /// # Errors
    /// - Failed to delete a model file
    pub fn clear_all_models(&self) -> Result<Vec<ModelProfile>> {
        let mut removed = Vec::new();
        for profile in ModelProfile::ALL {
            if self.clear_specific_model(profile)? {
                removed.push(profile);
            }
        }
        Ok(removed)
    }

    /// Remove one cached model file
    ///
    /// Returns `false` when the model was not cached.
    ///
    /// # Errors
    /// - Failed to delete the model file
    pub fn clear_specific_model(&self, profile: ModelProfile) -> Result<bool> {
        let path = self.model_file_path(profile);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| BgRemovalError::file_io_error("remove cached model", &path, &e))?;
        log::info!("Removed cached model: {}", profile);
        Ok(true)
    }

    /// Current cache directory
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let suffix = UNITS.get(unit).copied().unwrap_or("B");
    if unit == 0 {
        format!("{} {}", bytes, suffix)
    } else {
        format!("{:.1} {}", size, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_override_directory_wins() {
        let dir = ModelCache::resolve_cache_dir(Some("/srv/models")).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/models"));
    }

    #[test]
    fn test_blank_override_is_ignored() {
        if let Ok(dir) = ModelCache::resolve_cache_dir(Some("  ")) {
            assert!(dir.ends_with("bgremove-server/models"));
        }
    }

    #[test]
    fn test_scan_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        assert!(cache.scan_cached_models().unwrap().is_empty());

        fs::write(cache.model_file_path(ModelProfile::U2net), vec![0u8; 2048]).unwrap();
        fs::write(temp.path().join("unrelated.txt"), b"ignored").unwrap();

        assert!(cache.is_model_cached(ModelProfile::U2net));
        assert!(!cache.is_model_cached(ModelProfile::Silueta));

        let models = cache.scan_cached_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].profile, ModelProfile::U2net);
        assert_eq!(models[0].size_bytes, 2048);

        assert!(!cache.clear_specific_model(ModelProfile::Silueta).unwrap());
        assert_eq!(cache.clear_all_models().unwrap(), vec![ModelProfile::U2net]);
        assert!(!cache.is_model_cached(ModelProfile::U2net));
    }

    #[test]
    fn test_zero_byte_file_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        fs::write(cache.model_file_path(ModelProfile::IsnetAnime), b"").unwrap();
        assert!(!cache.is_model_cached(ModelProfile::IsnetAnime));
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        let cache = ModelCache::with_custom_cache_dir(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(cache.get_current_cache_dir(), &nested);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(176 * 1024 * 1024), "176.0 MB");
    }
}
