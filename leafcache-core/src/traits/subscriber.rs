use std::sync::Arc;

use image::DynamicImage;

/// Shared, immutable thumbnail bitmap.
pub type ThumbnailPixmap = Arc<DynamicImage>;

/// Terminal outcome of a background thumbnail load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbnailLoadStatus {
    /// A thumbnail was read from disk or generated.
    Loaded,
    /// Decoding or generation failed, or memory ran out.
    LoadFailed,
    /// The request was discarded without any I/O because it went stale,
    /// e.g. the cache directory changed while it was still queued.
    RequestExpired,
}

/// What a [`CompletionHandler`] receives. `pixmap` is only meaningful for
/// [`ThumbnailLoadStatus::Loaded`].
#[derive(Debug, Clone)]
pub struct ThumbnailLoadResult {
    /// How the load ended.
    pub status: ThumbnailLoadStatus,
    /// The thumbnail, when one was produced.
    pub pixmap: Option<ThumbnailPixmap>,
}

impl ThumbnailLoadResult {
    /// True when a thumbnail was produced.
    pub fn is_loaded(&self) -> bool {
        self.status == ThumbnailLoadStatus::Loaded
    }
}

/// Receives the outcome of a queued thumbnail request.
///
/// The cache only stores `Weak` references to handlers. A handler whose last
/// `Arc` was dropped before the load finished is skipped silently.
pub trait CompletionHandler: Send + Sync {
    /// Called once per queued request, on the thread draining completions.
    fn on_thumbnail_loaded(&self, result: &ThumbnailLoadResult);
}

impl<F> CompletionHandler for F
where
    F: Fn(&ThumbnailLoadResult) + Send + Sync,
{
    fn on_thumbnail_loaded(&self, result: &ThumbnailLoadResult) {
        self(result)
    }
}
