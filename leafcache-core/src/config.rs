use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{LeafcacheError, Result};

/// Environment variable naming a TOML or JSON config file.
pub const CONFIG_PATH_ENV: &str = "LEAFCACHE_CONFIG_PATH";
/// Environment variable holding an inline JSON config.
pub const CONFIG_JSON_ENV: &str = "LEAFCACHE_CONFIG_JSON";
/// Largest accepted `expiration_threshold`. Directory changes advance the
/// expiration clock by `threshold + 1`, so the cap keeps that clock far from
/// `u64::MAX`.
pub const MAX_EXPIRATION_THRESHOLD: u64 = u32::MAX as u64;

/// Maximum thumbnail dimensions in pixels. Generated thumbnails fit inside
/// this box with their aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ThumbSize {
    /// Maximum width.
    pub width: u32,
    /// Maximum height.
    pub height: u32,
}

impl ThumbSize {
    /// A `width` x `height` bounding box.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ThumbSize {
    fn default() -> Self {
        Self::new(250, 250)
    }
}

/// Caps applied while decoding source images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecodeLimits {
    /// Upper bound on the bytes a single decode may allocate. Scans beyond
    /// this resolve as allocation failures instead of exhausting memory.
    pub max_alloc_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_alloc_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Source that produced the cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Built-in defaults.
    #[default]
    Default,
    /// File named by `LEAFCACHE_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// JSON from `LEAFCACHE_CONFIG_JSON`.
    EnvInline,
}

/// Thumbnail cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThumbnailCacheConfig {
    /// Directory holding persisted thumbnails. Created on demand, but its
    /// parent must already exist.
    pub cache_dir: PathBuf,
    /// Bounding box for generated thumbnails.
    pub max_thumb_size: ThumbSize,
    /// Number of decoded thumbnails kept in memory. Older ones are evicted
    /// least-recently-used first and re-read from disk on the next request.
    pub max_cached_pixmaps: usize,
    /// How many loads may start after a request was queued before that
    /// request is considered stale and dropped without I/O. Small values
    /// favour whatever the user looked at last.
    pub expiration_threshold: u64,
    /// Limits applied by [`FileImageDecoder`](crate::FileImageDecoder).
    pub decode_limits: DecodeLimits,
}

impl Default for ThumbnailCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache").join("thumbs"),
            max_thumb_size: ThumbSize::default(),
            max_cached_pixmaps: 40,
            expiration_threshold: 5,
            decode_limits: DecodeLimits::default(),
        }
    }
}

impl ThumbnailCacheConfig {
    /// Defaults with thumbnails persisted under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set the thumbnail bounding box.
    pub fn with_max_thumb_size(mut self, size: ThumbSize) -> Self {
        self.max_thumb_size = size;
        self
    }

    /// Set how many thumbnails stay in memory.
    pub fn with_max_cached_pixmaps(mut self, count: usize) -> Self {
        self.max_cached_pixmaps = count;
        self
    }

    /// Set how many loads a queued request may wait through.
    pub fn with_expiration_threshold(mut self, threshold: u64) -> Self {
        self.expiration_threshold = threshold;
        self
    }

    /// Reject settings the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_cached_pixmaps == 0 {
            return Err(LeafcacheError::Config(
                "max_cached_pixmaps must be at least 1".to_string(),
            ));
        }
        if self.max_thumb_size.width == 0 || self.max_thumb_size.height == 0
        {
            return Err(LeafcacheError::Config(format!(
                "max_thumb_size must be non-zero, got {}x{}",
                self.max_thumb_size.width, self.max_thumb_size.height
            )));
        }
        if self.expiration_threshold > MAX_EXPIRATION_THRESHOLD {
            return Err(LeafcacheError::Config(format!(
                "expiration_threshold must be at most {MAX_EXPIRATION_THRESHOLD}, got {}",
                self.expiration_threshold
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(LeafcacheError::Config(
                "cache_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$LEAFCACHE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$LEAFCACHE_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            let config = Self::load_from_path(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let config = Self::from_json_str(&raw)
                .with_context(|| format!("parsing {CONFIG_JSON_ENV}"))?;
            return Ok((config, ConfigSource::EnvInline));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    /// Read a config file; `.json` files are parsed as JSON, anything else as
    /// TOML.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| {
            format!("reading thumbnail cache config {}", path.display())
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        }
        .with_context(|| format!("parsing {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate a TOML config.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
