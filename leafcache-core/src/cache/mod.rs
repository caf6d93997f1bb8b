//! The thumbnail pixmap cache.
//!
//! [`ThumbnailPixmapCache`] answers thumbnail requests from memory when it
//! can and otherwise queues them for a single background loader. The loader
//! reuses thumbnails persisted in the cache directory, or decodes the source
//! page and generates a new one. Finished loads are reported back through
//! [`CompletionHandler`]s on whichever thread drains the completions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use leafcache_core::{
//!     CompletionHandler, ImageId, ScaledThumbnailGenerator, ThumbKey,
//!     ThumbnailCacheConfig, ThumbnailLoadResult, ThumbnailPixmapCache,
//! };
//!
//! # fn main() -> leafcache_core::Result<()> {
//! let config = ThumbnailCacheConfig::new("/projects/book/cache/thumbs");
//! let cache = ThumbnailPixmapCache::with_file_decoder(&config)?;
//!
//! let handler: Arc<dyn CompletionHandler> =
//!     Arc::new(|result: &ThumbnailLoadResult| {
//!         println!("thumbnail ready: {:?}", result.status);
//!     });
//! let key = ThumbKey::new(ImageId::new("/projects/book/p001.tif", 0), "v1");
//! let status = cache.request(
//!     &key,
//!     &ScaledThumbnailGenerator::default(),
//!     Arc::downgrade(&handler),
//! );
//! if status.is_queued() {
//!     cache.wait_for_completion(Duration::from_secs(5));
//! }
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod lifecycle;
mod store;
mod worker;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use image::DynamicImage;
use parking_lot::{Condvar, Mutex};

use crate::config::{ThumbSize, ThumbnailCacheConfig};
use crate::error::Result;
use crate::key::ThumbKey;
use crate::persist::{self, normalize_path, thumbnail_path};
use crate::traits::{
    CompletionHandler, FileImageDecoder, ImageDecoder, LogOutOfMemory,
    OutOfMemoryHandler, ThumbnailGenerator,
};

use dispatch::{Dispatcher, LoadResult};
use lifecycle::{CacheState, WorkerWake};
use worker::Worker;

pub use dispatch::CompletionNotifier;
pub use lifecycle::{CacheStats, RequestStatus};

/// State shared with the loader thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<CacheState>,
    /// Signalled when work is queued or shutdown begins.
    pub(crate) wake: Condvar,
}

/// Starts the loader thread.
type SpawnLoader = fn(Worker) -> io::Result<JoinHandle<()>>;

/// Bounded in-memory thumbnail cache backed by a directory of PNG files.
///
/// Misses are loaded by one background thread; see the module docs for the
/// request and completion flow. Dropping the cache stops the loader.
pub struct ThumbnailPixmapCache {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    results: Sender<LoadResult>,
    worker: Mutex<Option<JoinHandle<()>>>,
    decoder: Arc<dyn ImageDecoder>,
    oom_handler: Arc<dyn OutOfMemoryHandler>,
    notifier: Option<CompletionNotifier>,
    spawn_loader: SpawnLoader,
}

impl ThumbnailPixmapCache {
    /// Build a cache that decodes sources with `decoder`. The cache
    /// directory is created if its parent exists; otherwise thumbnails are
    /// still produced but not persisted.
    pub fn new(
        config: &ThumbnailCacheConfig,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let cache_dir = normalize_path(&config.cache_dir);
        persist::ensure_cache_dir(&cache_dir);

        let (results, receiver) = mpsc::channel();
        tracing::debug!(
            cache_dir = ?cache_dir,
            capacity = config.max_cached_pixmaps,
            expiration_threshold = config.expiration_threshold,
            "thumbnail cache created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::new(config, cache_dir)),
                wake: Condvar::new(),
            }),
            dispatcher: Dispatcher::new(receiver),
            results,
            worker: Mutex::new(None),
            decoder,
            oom_handler: Arc::new(LogOutOfMemory),
            notifier: None,
            spawn_loader: Worker::spawn,
        })
    }

    /// Cache backed by [`FileImageDecoder`] with the configured limits.
    pub fn with_file_decoder(config: &ThumbnailCacheConfig) -> Result<Self> {
        let decoder = FileImageDecoder::new(config.decode_limits);
        Self::new(config, Arc::new(decoder))
    }

    /// Replace the default out-of-memory handler, which only logs.
    pub fn with_out_of_memory_handler(
        mut self,
        handler: Arc<dyn OutOfMemoryHandler>,
    ) -> Self {
        self.oom_handler = handler;
        self
    }

    /// Register a callback the loader thread invokes after posting each
    /// result.
    pub fn with_completion_notifier<F>(mut self, notifier: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Directory thumbnails are currently persisted to.
    pub fn cache_directory(&self) -> PathBuf {
        self.shared.state.lock().cache_dir().to_path_buf()
    }

    /// Point the cache at another directory. Requests still queued for the
    /// old one resolve as expired; a load already in progress finishes
    /// against the old directory.
    pub fn set_cache_directory(&self, dir: impl AsRef<Path>) {
        let dir = normalize_path(dir.as_ref());
        let changed = self.shared.state.lock().change_cache_dir(dir.clone());
        if changed {
            persist::ensure_cache_dir(&dir);
        }
    }

    /// Look up or schedule the thumbnail for `key`.
    ///
    /// `subscriber` is told the outcome only when [`RequestStatus::Queued`]
    /// is returned. `generator` is copied and used only if the thumbnail has
    /// to be built.
    pub fn request(
        &self,
        key: &ThumbKey,
        generator: &dyn ThumbnailGenerator,
        subscriber: Weak<dyn CompletionHandler>,
    ) -> RequestStatus {
        let (status, wake) =
            self.shared.state.lock().request(key, generator, subscriber);

        match wake {
            WorkerWake::Nothing => {}
            WorkerWake::Notify => {
                self.shared.wake.notify_one();
            }
            WorkerWake::Start => self.start_worker(),
        }
        status
    }

    /// Like [`request`](Self::request), but never schedules a load.
    /// Anything not already finished reports `LoadFailed(None)`.
    pub fn peek(&self, key: &ThumbKey) -> RequestStatus {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            return RequestStatus::LoadFailed(None);
        }
        state
            .lookup(key)
            .unwrap_or(RequestStatus::LoadFailed(None))
    }

    /// Make sure a persisted thumbnail exists for `key`, generating it from
    /// `source` if not. Runs on the calling thread and leaves the in-memory
    /// state untouched. Returns whether a thumbnail file is in place.
    pub fn ensure_exists(
        &self,
        key: &ThumbKey,
        source: &DynamicImage,
        generator: &dyn ThumbnailGenerator,
    ) -> bool {
        let Some((path, max_size)) = self.target_for(key, source) else {
            return false;
        };
        if path.exists() {
            tracing::trace!(%key, "thumbnail already on disk");
            return true;
        }
        self.write_thumbnail(key, &path, source, max_size, generator)
    }

    /// Regenerate the thumbnail for `key` from `source` and overwrite the
    /// persisted file. A finished in-memory entry is dropped so the next
    /// request picks up the new file.
    pub fn recreate(
        &self,
        key: &ThumbKey,
        source: &DynamicImage,
        generator: &dyn ThumbnailGenerator,
    ) -> bool {
        let Some((path, max_size)) = self.target_for(key, source) else {
            return false;
        };
        if !self.write_thumbnail(key, &path, source, max_size, generator) {
            return false;
        }
        if self.shared.state.lock().forget_finished(key) {
            tracing::debug!(%key, "dropped stale in-memory thumbnail");
        }
        true
    }

    /// Deliver every result the loader has posted so far. Returns the number
    /// of results handled.
    pub fn process_completions(&self) -> usize {
        self.dispatcher.dispatch_pending(&self.shared)
    }

    /// Wait up to `timeout` for the next result and deliver it. Returns
    /// false on timeout.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.dispatcher.dispatch_one(&self.shared, timeout)
    }

    /// Snapshot of the record counters.
    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().stats()
    }

    /// Stop the loader and wait for it to exit. Results still in flight are
    /// discarded and later requests report `LoadFailed`. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.shutting_down {
                tracing::debug!(
                    pending = state.store.queued_count(),
                    "shutting down thumbnail cache"
                );
            }
            state.shutting_down = true;
        }
        self.shared.wake.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("thumbnail loader thread panicked");
        }
    }

    fn start_worker(&self) {
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            results: self.results.clone(),
            decoder: Arc::clone(&self.decoder),
            oom_handler: Arc::clone(&self.oom_handler),
            notifier: self.notifier.clone(),
        };
        match (self.spawn_loader)(worker) {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "failed to start thumbnail loader thread"
                );
                self.shared.state.lock().worker_start_failed();
            }
        }
    }

    fn target_for(
        &self,
        key: &ThumbKey,
        source: &DynamicImage,
    ) -> Option<(PathBuf, ThumbSize)> {
        if source.width() == 0 || source.height() == 0 {
            tracing::debug!(%key, "ignoring empty source image");
            return None;
        }
        let state = self.shared.state.lock();
        if state.shutting_down {
            return None;
        }
        let path = thumbnail_path(key, state.cache_dir());
        Some((path, state.max_thumb_size()))
    }

    fn write_thumbnail(
        &self,
        key: &ThumbKey,
        path: &Path,
        source: &DynamicImage,
        max_size: ThumbSize,
        generator: &dyn ThumbnailGenerator,
    ) -> bool {
        let written = generator
            .generate(source, max_size)
            .and_then(|thumbnail| persist::save_thumbnail(path, &thumbnail));
        match written {
            Ok(()) => {
                tracing::trace!(%key, path = ?path, "thumbnail written");
                true
            }
            Err(err) => {
                tracing::warn!(
                    %key,
                    error = %err,
                    "failed to write thumbnail"
                );
                false
            }
        }
    }
}

impl Drop for ThumbnailPixmapCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThumbnailPixmapCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ThumbnailPixmapCache")
            .field("cache_dir", &self.cache_directory())
            .field("stats", &stats)
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}
