//! The background loader thread.
//!
//! One thread per cache, started by the first request that leaves work
//! queued while no loader is running. It sleeps on the cache's condition variable while the queue is
//! empty and exits once `shutting_down` is set.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use image::DynamicImage;

use super::Shared;
use super::dispatch::{CompletionNotifier, LoadResult};
use super::lifecycle::Dequeued;
use super::store::RecordId;
use crate::config::ThumbSize;
use crate::error::{LeafcacheError, Result};
use crate::key::ThumbKey;
use crate::persist::{self, thumbnail_path};
use crate::traits::{ImageDecoder, OutOfMemoryHandler, ThumbnailGenerator};

const THREAD_NAME: &str = "leafcache-loader";

/// Everything needed to produce one thumbnail without holding the lock.
pub(crate) struct LoadJob {
    pub(crate) id: RecordId,
    pub(crate) key: ThumbKey,
    pub(crate) cache_dir: PathBuf,
    pub(crate) max_size: ThumbSize,
    pub(crate) generator: Box<dyn ThumbnailGenerator>,
}

pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) results: Sender<LoadResult>,
    pub(crate) decoder: Arc<dyn ImageDecoder>,
    pub(crate) oom_handler: Arc<dyn OutOfMemoryHandler>,
    pub(crate) notifier: Option<CompletionNotifier>,
}

impl Worker {
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        tracing::info!("thumbnail loader started");
        let _restart = RestartOnPanic(&self.shared);
        loop {
            let Some(next) = self.wait_for_work() else {
                tracing::debug!("thumbnail loader stopping");
                return;
            };

            let result = match next {
                Dequeued::Expired(id) => LoadResult::expired(id),
                Dequeued::Load(job) => self.load(job),
            };

            if self.results.send(result).is_err() {
                tracing::debug!("cache dropped; thumbnail loader exiting");
                return;
            }
            if let Some(notify) = &self.notifier {
                notify();
            }
        }
    }

    /// `None` means shut down.
    fn wait_for_work(&self) -> Option<Dequeued> {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutting_down {
                return None;
            }
            if let Some(next) = state.next_job() {
                return Some(next);
            }
            self.shared.wake.wait(&mut state);
        }
    }

    fn load(&self, job: LoadJob) -> LoadResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            load_or_generate(&job, self.decoder.as_ref())
        }));

        match outcome {
            Ok(Ok(thumbnail)) => {
                LoadResult::loaded(job.id, Arc::new(thumbnail))
            }
            Ok(Err(err)) if err.is_out_of_memory() => {
                tracing::error!(
                    key = %job.key,
                    error = %err,
                    "out of memory loading thumbnail"
                );
                self.oom_handler.handle_out_of_memory(&format!(
                    "thumbnail {}: {err}",
                    job.key
                ));
                LoadResult::failed(job.id)
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    key = %job.key,
                    error = %err,
                    "thumbnail load failed"
                );
                LoadResult::failed(job.id)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    key = %job.key,
                    panic = %message,
                    "thumbnail loader panicked"
                );
                LoadResult::failed(job.id)
            }
        }
    }
}

/// Hands the start claim back if the loader unwinds outside a job, so the
/// next request spawns a replacement instead of queueing behind a dead
/// thread.
struct RestartOnPanic<'a>(&'a Shared);

impl Drop for RestartOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("thumbnail loader died; next request restarts it");
            self.0.state.lock().worker_start_failed();
        }
    }
}

/// Reuse the persisted thumbnail if it decodes, else build and persist a new
/// one. A failed write still yields the generated bitmap.
fn load_or_generate(
    job: &LoadJob,
    decoder: &dyn ImageDecoder,
) -> Result<DynamicImage> {
    let path = thumbnail_path(&job.key, &job.cache_dir);

    match persist::load_thumbnail(&path) {
        Ok(existing) => {
            tracing::trace!(key = %job.key, "thumbnail read from disk");
            return Ok(existing);
        }
        Err(err) if err.is_out_of_memory() => return Err(err),
        Err(LeafcacheError::Io(err))
            if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                path = ?path,
                error = %err,
                "regenerating unreadable thumbnail"
            );
        }
    }

    let source = decoder.decode(job.key.image_id())?;
    let thumbnail = job.generator.generate(&source, job.max_size)?;
    if let Err(err) = persist::save_thumbnail(&path, &thumbnail) {
        tracing::warn!(
            path = ?path,
            error = %err,
            "failed to persist thumbnail"
        );
    }
    Ok(thumbnail)
}
