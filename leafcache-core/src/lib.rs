//! # Leafcache Core
//!
//! Thumbnail cache for page-oriented scanned documents.
//!
//! ## Overview
//!
//! A page view asks for small previews of many scanned pages at once. Most
//! of them were shown before, so `leafcache-core` keeps them in three tiers:
//!
//! - **Memory**: a bounded, least-recently-used set of decoded thumbnails
//! - **Disk**: one PNG per page and version inside a cache directory
//! - **Source**: the full-resolution scan, decoded and downscaled on demand
//!
//! Requests that miss memory are queued for a single background loader.
//! The newest request is served first, and requests that sat in the queue
//! too long (or whose cache directory changed) are dropped without I/O.
//!
//! ## Architecture
//!
//! - [`cache`]: [`ThumbnailPixmapCache`] and its loader
//! - [`key`]: identity of a source page and a thumbnail version
//! - [`persist`]: file naming and atomic thumbnail writes
//! - [`traits`]: decoder, generator, subscriber and out-of-memory seams
//! - [`config`]: cache settings and how to load them
//! - [`error`]: the crate error type
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use leafcache_core::{
//!     CompletionHandler, ImageId, ScaledThumbnailGenerator, ThumbKey,
//!     ThumbnailCacheConfig, ThumbnailLoadResult, ThumbnailPixmapCache,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let (config, _source) = ThumbnailCacheConfig::load_from_env()?;
//! let cache = ThumbnailPixmapCache::with_file_decoder(&config)?;
//!
//! let on_ready: Arc<dyn CompletionHandler> =
//!     Arc::new(|result: &ThumbnailLoadResult| {
//!         if let Some(pixmap) = &result.pixmap {
//!             println!("{}x{}", pixmap.width(), pixmap.height());
//!         }
//!     });
//!
//! let page = ImageId::new("/scans/book/0001.tif", 0);
//! let key = ThumbKey::new(page, "deskewed");
//! cache.request(
//!     &key,
//!     &ScaledThumbnailGenerator::default(),
//!     Arc::downgrade(&on_ready),
//! );
//!
//! // Somewhere on the UI thread:
//! cache.process_completions();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod persist;
pub mod traits;

pub use cache::{
    CacheStats, CompletionNotifier, RequestStatus, ThumbnailPixmapCache,
};
pub use config::{
    ConfigSource, DecodeLimits, MAX_EXPIRATION_THRESHOLD, ThumbSize,
    ThumbnailCacheConfig,
};
pub use error::{LeafcacheError, Result};
pub use key::{ImageId, ThumbKey};
pub use traits::{
    CompletionHandler, FileImageDecoder, ImageDecoder, LogOutOfMemory,
    OutOfMemoryHandler, ScaledThumbnailGenerator, ThumbnailGenerator,
    ThumbnailLoadResult, ThumbnailLoadStatus, ThumbnailPixmap,
};
