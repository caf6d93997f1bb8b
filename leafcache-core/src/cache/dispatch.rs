//! Delivery of loader results on the owner's thread.
//!
//! The loader never calls subscribers. It sends a [`LoadResult`] through a
//! channel and the owner drains that channel with
//! [`ThumbnailPixmapCache::process_completions`](super::ThumbnailPixmapCache::process_completions)
//! or [`wait_for_completion`](super::ThumbnailPixmapCache::wait_for_completion).
//! State changes happen under the cache lock; handlers run after it has
//! been released, so they are free to call back into the cache.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use parking_lot::Mutex;

use super::Shared;
use super::store::RecordId;
use crate::traits::{
    CompletionHandler, ThumbnailLoadResult, ThumbnailLoadStatus,
    ThumbnailPixmap,
};

/// Called from the loader thread after each result is posted. Use it to wake
/// an event loop that will then call `process_completions`.
pub type CompletionNotifier = Arc<dyn Fn() + Send + Sync>;

/// Message from the loader to the owner.
#[derive(Debug)]
pub(crate) struct LoadResult {
    pub(crate) id: RecordId,
    pub(crate) status: ThumbnailLoadStatus,
    pub(crate) pixmap: Option<ThumbnailPixmap>,
}

impl LoadResult {
    pub(crate) fn loaded(id: RecordId, pixmap: ThumbnailPixmap) -> Self {
        Self {
            id,
            status: ThumbnailLoadStatus::Loaded,
            pixmap: Some(pixmap),
        }
    }

    pub(crate) fn failed(id: RecordId) -> Self {
        Self {
            id,
            status: ThumbnailLoadStatus::LoadFailed,
            pixmap: None,
        }
    }

    pub(crate) fn expired(id: RecordId) -> Self {
        Self {
            id,
            status: ThumbnailLoadStatus::RequestExpired,
            pixmap: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    results: Mutex<Receiver<LoadResult>>,
}

impl Dispatcher {
    pub(crate) fn new(results: Receiver<LoadResult>) -> Self {
        Self {
            results: Mutex::new(results),
        }
    }

    /// Handle every result already posted. Returns how many were handled.
    pub(crate) fn dispatch_pending(&self, shared: &Shared) -> usize {
        let mut handled = 0;
        while let Some(result) = self.try_next() {
            dispatch(shared, result);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for one result and handle it.
    pub(crate) fn dispatch_one(
        &self,
        shared: &Shared,
        timeout: Duration,
    ) -> bool {
        let received = self.results.lock().recv_timeout(timeout);
        match received {
            Ok(result) => {
                dispatch(shared, result);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::trace!("load result channel closed");
                false
            }
        }
    }

    fn try_next(&self) -> Option<LoadResult> {
        match self.results.lock().try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

fn dispatch(shared: &Shared, result: LoadResult) {
    let completion = shared.state.lock().complete(result);
    if let Some(completion) = completion {
        notify_subscribers(completion.subscribers, &completion.result);
    }
}

/// Invoke every handler that is still alive. Returns how many were called.
pub(crate) fn notify_subscribers(
    subscribers: Vec<Weak<dyn CompletionHandler>>,
    result: &ThumbnailLoadResult,
) -> usize {
    let mut delivered = 0;
    for subscriber in subscribers {
        match subscriber.upgrade() {
            Some(handler) => {
                handler.on_thumbnail_loaded(result);
                delivered += 1;
            }
            None => tracing::trace!("skipping dropped thumbnail subscriber"),
        }
    }
    delivered
}
