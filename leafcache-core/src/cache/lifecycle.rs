//! Record lifecycle and the state guarded by the cache lock.
//!
//! ```text
//!            request (miss)
//!                 |
//!                 v
//!   +-------->  QUEUED  -- dequeued while stale --> removed (RequestExpired)
//!   |             |
//!   |          dequeued
//!   |             v
//!   |        IN_PROGRESS --> LOADED      (evictable, LRU)
//!   |                   \--> LOAD_FAILED (kept until recreate)
//!   |                             |
//!   +------ recreate removes -----+
//! ```
//!
//! Every method here runs with the lock held and never touches the
//! filesystem, the decoder or a subscriber.

use std::path::{Path, PathBuf};
use std::sync::Weak;

use super::dispatch::LoadResult;
use super::store::{Record, RecordId, RecordStore};
use super::worker::LoadJob;
use crate::config::{
    MAX_EXPIRATION_THRESHOLD, ThumbSize, ThumbnailCacheConfig,
};
use crate::key::ThumbKey;
use crate::traits::{
    CompletionHandler, ThumbnailGenerator, ThumbnailLoadResult,
    ThumbnailLoadStatus, ThumbnailPixmap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RecordStatus {
    Queued,
    InProgress,
    Loaded,
    LoadFailed,
}

/// Immediate answer to a thumbnail request.
#[derive(Debug, Clone)]
pub enum RequestStatus {
    /// Served from memory; no callback will follow.
    Loaded(ThumbnailPixmap),
    /// A previous load failed, or the cache is shutting down. No callback
    /// will follow.
    LoadFailed(Option<ThumbnailPixmap>),
    /// The subscriber will be told once the background load finishes.
    Queued,
}

impl RequestStatus {
    /// The bitmap carried by this status, if any.
    pub fn pixmap(&self) -> Option<&ThumbnailPixmap> {
        match self {
            Self::Loaded(pixmap) => Some(pixmap),
            Self::LoadFailed(pixmap) => pixmap.as_ref(),
            Self::Queued => None,
        }
    }

    /// True for a memory hit.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// True when a callback will follow.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Records of any status.
    pub records: usize,
    /// Records waiting for the loader.
    pub queued: usize,
    /// Records holding a bitmap in memory.
    pub loaded: usize,
    /// Loads started (expired dequeues excluded).
    pub load_attempts: u64,
}

/// What the caller must do for the loader after the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerWake {
    Nothing,
    Start,
    Notify,
}

/// Work handed to the loader when it dequeues a record.
pub(crate) enum Dequeued {
    Expired(RecordId),
    Load(LoadJob),
}

/// Subscribers to notify, plus what to tell them.
pub(crate) struct Completion {
    pub(crate) subscribers: Vec<Weak<dyn CompletionHandler>>,
    pub(crate) result: ThumbnailLoadResult,
}

#[derive(Debug)]
pub(crate) struct CacheState {
    pub(crate) store: RecordStore,
    cache_dir: PathBuf,
    max_thumb_size: ThumbSize,
    capacity: usize,
    expiration_threshold: u64,
    /// Expiration clock. Advances on every started load and jumps forward
    /// on bulk invalidation. The threshold cap keeps it far from overflow.
    attempts: u64,
    loads_started: u64,
    pub(crate) shutting_down: bool,
    pub(crate) worker_started: bool,
}

impl CacheState {
    pub(crate) fn new(
        config: &ThumbnailCacheConfig,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            store: RecordStore::new(),
            cache_dir,
            max_thumb_size: config.max_thumb_size,
            capacity: config.max_cached_pixmaps.max(1),
            expiration_threshold: config
                .expiration_threshold
                .min(MAX_EXPIRATION_THRESHOLD),
            attempts: 0,
            loads_started: 0,
            shutting_down: false,
            worker_started: false,
        }
    }

    pub(crate) fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub(crate) fn max_thumb_size(&self) -> ThumbSize {
        self.max_thumb_size
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            records: self.store.len(),
            queued: self.store.queued_count(),
            loaded: self.store.loaded_count(),
            load_attempts: self.loads_started,
        }
    }

    /// Answer from memory if the key has a final outcome. A LOADED hit
    /// becomes the most recently used.
    pub(crate) fn lookup(&mut self, key: &ThumbKey) -> Option<RequestStatus> {
        let id = self.store.find(key)?;
        let record = self.store.get(id)?;
        match record.status() {
            RecordStatus::Loaded => {
                let pixmap = record.pixmap.clone();
                self.store.move_to_loaded_tail(id);
                Some(match pixmap {
                    Some(pixmap) => RequestStatus::Loaded(pixmap),
                    None => RequestStatus::LoadFailed(None),
                })
            }
            RecordStatus::LoadFailed => {
                Some(RequestStatus::LoadFailed(record.pixmap.clone()))
            }
            RecordStatus::Queued | RecordStatus::InProgress => None,
        }
    }

    pub(crate) fn request(
        &mut self,
        key: &ThumbKey,
        generator: &dyn ThumbnailGenerator,
        subscriber: Weak<dyn CompletionHandler>,
    ) -> (RequestStatus, WorkerWake) {
        if self.shutting_down {
            return (RequestStatus::LoadFailed(None), WorkerWake::Nothing);
        }

        if let Some(hit) = self.lookup(key) {
            return (hit, WorkerWake::Nothing);
        }

        if let Some(id) = self.store.find(key) {
            let queued = match self.store.get_mut(id) {
                Some(record) => {
                    record.subscribers.push(subscriber);
                    record.status() == RecordStatus::Queued
                }
                None => false,
            };
            // The latest request for a queued key is served first.
            if queued {
                self.store.move_to_load_front(id);
            }
            tracing::trace!(%key, queued, "joined pending thumbnail request");
            let wake = if self.worker_started {
                WorkerWake::Nothing
            } else {
                self.claim_worker_start()
            };
            return (RequestStatus::Queued, wake);
        }

        let mut record =
            Record::queued(key.clone(), generator.clone_box(), self.attempts);
        record.subscribers.push(subscriber);
        self.store.insert(record);
        tracing::trace!(%key, "queued thumbnail request");

        // The loader only sleeps once nothing is queued, so it needs a
        // signal on the first queued record alone.
        let wake = if !self.worker_started {
            self.claim_worker_start()
        } else if self.store.queued_count() == 1 {
            WorkerWake::Notify
        } else {
            WorkerWake::Nothing
        };
        (RequestStatus::Queued, wake)
    }

    /// The caller must start the loader, and hand the claim back with
    /// [`worker_start_failed`](Self::worker_start_failed) if it cannot.
    fn claim_worker_start(&mut self) -> WorkerWake {
        self.worker_started = true;
        WorkerWake::Start
    }

    /// Undo a start claim. The next request retries, and picks up whatever
    /// is already queued.
    pub(crate) fn worker_start_failed(&mut self) {
        self.worker_started = false;
    }

    /// Switch directories. Queued requests for the old one are expired.
    /// Returns false if `dir` is already current.
    pub(crate) fn change_cache_dir(&mut self, dir: PathBuf) -> bool {
        if dir == self.cache_dir {
            return false;
        }
        tracing::info!(
            from = ?self.cache_dir,
            to = ?dir,
            queued = self.store.queued_count(),
            "thumbnail cache directory changed"
        );
        self.cache_dir = dir;
        self.expire_queued();
        true
    }

    /// Make every currently QUEUED record stale in constant time by pushing
    /// the attempt counter past their expiration point.
    pub(crate) fn expire_queued(&mut self) {
        if self.store.queued_count() > 0 {
            self.attempts = self
                .attempts
                .saturating_add(self.expiration_threshold)
                .saturating_add(1);
        }
    }

    /// Take the front of the load order if it is QUEUED and mark it
    /// IN_PROGRESS.
    pub(crate) fn next_job(&mut self) -> Option<Dequeued> {
        let (id, _) = self
            .store
            .iter_load()
            .next()
            .filter(|(_, record)| record.status() == RecordStatus::Queued)?;
        self.store.set_status(id, RecordStatus::InProgress);
        self.store.move_to_load_back(id);

        let record = self.store.get(id)?;
        let age = self.attempts.saturating_sub(record.created_at_attempt());
        if age > self.expiration_threshold {
            tracing::debug!(key = %record.key(), age, "thumbnail request expired");
            return Some(Dequeued::Expired(id));
        }

        self.attempts = self.attempts.saturating_add(1);
        self.loads_started = self.loads_started.saturating_add(1);
        Some(Dequeued::Load(LoadJob {
            id,
            key: record.key().clone(),
            cache_dir: self.cache_dir.clone(),
            max_size: self.max_thumb_size,
            generator: record.generator().clone_box(),
        }))
    }

    /// Apply a loader result. Returns `None` when the result no longer
    /// applies (shutdown, or the record is gone).
    pub(crate) fn complete(&mut self, result: LoadResult) -> Option<Completion> {
        if self.shutting_down {
            return None;
        }
        let id = result.id;
        let Some(record) = self.store.get(id) else {
            tracing::warn!("dropping load result for a removed record");
            return None;
        };
        if record.status() != RecordStatus::InProgress {
            tracing::warn!(
                key = %record.key(),
                status = ?record.status(),
                "dropping load result for a record not in progress"
            );
            return None;
        }

        match (result.status, result.pixmap) {
            (ThumbnailLoadStatus::Loaded, Some(pixmap)) => {
                // Keep the LOADED count within capacity once this one lands.
                self.evict_excess();
                self.store.set_status(id, RecordStatus::Loaded);
                self.store.move_to_loaded_tail(id);
                self.store.move_to_load_back(id);
                let record = self.store.get_mut(id)?;
                record.pixmap = Some(pixmap.clone());
                Some(Completion {
                    subscribers: std::mem::take(&mut record.subscribers),
                    result: ThumbnailLoadResult {
                        status: ThumbnailLoadStatus::Loaded,
                        pixmap: Some(pixmap),
                    },
                })
            }
            (ThumbnailLoadStatus::RequestExpired, _) => {
                let record = self.store.remove(id)?;
                Some(Completion {
                    subscribers: record.subscribers,
                    result: ThumbnailLoadResult {
                        status: ThumbnailLoadStatus::RequestExpired,
                        pixmap: None,
                    },
                })
            }
            (ThumbnailLoadStatus::LoadFailed, pixmap)
            | (ThumbnailLoadStatus::Loaded, pixmap @ None) => {
                self.store.set_status(id, RecordStatus::LoadFailed);
                self.store.move_to_load_back(id);
                let record = self.store.get_mut(id)?;
                record.pixmap = pixmap.clone();
                Some(Completion {
                    subscribers: std::mem::take(&mut record.subscribers),
                    result: ThumbnailLoadResult {
                        status: ThumbnailLoadStatus::LoadFailed,
                        pixmap,
                    },
                })
            }
        }
    }

    /// Drop least recently used LOADED records until there is room for one
    /// more.
    pub(crate) fn evict_excess(&mut self) {
        while self.store.loaded_count() >= self.capacity {
            let Some(victim) = self.store.least_recently_used() else {
                break;
            };
            if let Some(record) = self.store.remove(victim) {
                tracing::trace!(key = %record.key(), "evicted thumbnail");
            }
        }
    }

    /// Forget a finished record so the next request reloads from disk.
    /// QUEUED and IN_PROGRESS records are left alone.
    pub(crate) fn forget_finished(&mut self, key: &ThumbKey) -> bool {
        let Some(id) = self.store.find(key) else {
            return false;
        };
        let finished = self.store.get(id).is_some_and(|record| {
            matches!(
                record.status(),
                RecordStatus::Loaded | RecordStatus::LoadFailed
            )
        });
        if finished {
            self.store.remove(id);
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use image::{DynamicImage, RgbImage};

    use super::*;
    use crate::key::ImageId;
    use crate::traits::ScaledThumbnailGenerator;

    type Seen = Arc<Mutex<Vec<ThumbnailLoadStatus>>>;

    fn key(name: &str) -> ThumbKey {
        ThumbKey::new(ImageId::new(format!("/scans/{name}.tif"), 0), "v1")
    }

    fn state(capacity: usize, threshold: u64) -> CacheState {
        let config = ThumbnailCacheConfig::new("/tmp/thumbs")
            .with_max_cached_pixmaps(capacity)
            .with_expiration_threshold(threshold);
        CacheState::new(&config, config.cache_dir.clone())
    }

    fn recorder() -> (Arc<dyn CompletionHandler>, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let handler: Arc<dyn CompletionHandler> =
            Arc::new(move |result: &ThumbnailLoadResult| {
                sink.lock().unwrap().push(result.status);
            });
        (handler, seen)
    }

    fn request(
        state: &mut CacheState,
        name: &str,
        handler: &Arc<dyn CompletionHandler>,
    ) -> (RequestStatus, WorkerWake) {
        state.request(
            &key(name),
            &ScaledThumbnailGenerator::default(),
            Arc::downgrade(handler),
        )
    }

    fn pixmap() -> ThumbnailPixmap {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
    }

    /// Dequeue the next record and finish it the way the loader would.
    fn run_next(state: &mut CacheState) -> Option<Completion> {
        let result = match state.next_job()? {
            Dequeued::Expired(id) => LoadResult::expired(id),
            Dequeued::Load(job) => LoadResult::loaded(job.id, pixmap()),
        };
        state.complete(result)
    }

    fn deliver(completion: Completion) {
        for weak in completion.subscribers {
            if let Some(handler) = weak.upgrade() {
                handler.on_thumbnail_loaded(&completion.result);
            }
        }
    }

    fn job_key(dequeued: Option<Dequeued>) -> ThumbKey {
        match dequeued {
            Some(Dequeued::Load(job)) => job.key,
            Some(Dequeued::Expired(_)) => panic!("unexpected expiry"),
            None => panic!("nothing queued"),
        }
    }

    #[test]
    fn first_miss_starts_the_worker_once() {
        let mut state = state(4, 100);
        let (handler, _) = recorder();

        assert_eq!(request(&mut state, "a", &handler).1, WorkerWake::Start);
        assert_eq!(request(&mut state, "b", &handler).1, WorkerWake::Nothing);

        while let Some(done) = run_next(&mut state) {
            deliver(done);
        }
        assert_eq!(request(&mut state, "c", &handler).1, WorkerWake::Notify);
        state.store.assert_consistent();
    }

    #[test]
    fn duplicate_requests_share_one_record() {
        let mut state = state(4, 100);
        let (first, seen_first) = recorder();
        let (second, seen_second) = recorder();

        assert!(request(&mut state, "a", &first).0.is_queued());
        assert!(request(&mut state, "a", &second).0.is_queued());
        assert_eq!(state.store.len(), 1);

        deliver(run_next(&mut state).expect("completion"));
        assert!(run_next(&mut state).is_none());
        assert_eq!(state.stats().load_attempts, 1);
        assert_eq!(*seen_first.lock().unwrap(), [ThumbnailLoadStatus::Loaded]);
        assert_eq!(*seen_second.lock().unwrap(), [ThumbnailLoadStatus::Loaded]);

        // Now served from memory, without a callback.
        assert!(request(&mut state, "a", &first).0.is_loaded());
        assert_eq!(seen_first.lock().unwrap().len(), 1);
    }

    #[test]
    fn newest_request_is_loaded_first() {
        let mut state = state(4, 100);
        let (handler, _) = recorder();
        request(&mut state, "a", &handler);
        request(&mut state, "b", &handler);
        request(&mut state, "c", &handler);
        // Re-requesting `a` bumps it to the front.
        request(&mut state, "a", &handler);

        assert_eq!(job_key(state.next_job()), key("a"));
        assert_eq!(job_key(state.next_job()), key("c"));
        assert_eq!(job_key(state.next_job()), key("b"));
        assert!(state.next_job().is_none());
        state.store.assert_consistent();
    }

    #[test]
    fn request_for_in_progress_key_only_adds_subscriber() {
        let mut state = state(4, 100);
        let (handler, seen) = recorder();
        request(&mut state, "a", &handler);
        let Some(Dequeued::Load(job)) = state.next_job() else {
            panic!("expected a load job");
        };

        let (status, wake) = request(&mut state, "a", &handler);
        assert!(status.is_queued());
        assert_eq!(wake, WorkerWake::Nothing);
        assert!(state.next_job().is_none());

        deliver(
            state
                .complete(LoadResult::loaded(job.id, pixmap()))
                .expect("completion"),
        );
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn loaded_count_never_exceeds_capacity() {
        let mut state = state(2, 100);
        let (handler, _) = recorder();
        for name in ["a", "b", "c", "d"] {
            request(&mut state, name, &handler);
            deliver(run_next(&mut state).expect("completion"));
            assert!(state.stats().loaded <= 2);
            state.store.assert_consistent();
        }
        assert!(state.store.find(&key("a")).is_none());
        assert!(state.store.find(&key("b")).is_none());
        assert!(state.lookup(&key("c")).is_some());
        assert!(state.lookup(&key("d")).is_some());
    }

    #[test]
    fn hit_refreshes_recency_and_changes_victim() {
        let mut state = state(2, 100);
        let (handler, _) = recorder();
        for name in ["a", "b"] {
            request(&mut state, name, &handler);
            deliver(run_next(&mut state).expect("completion"));
        }
        assert!(request(&mut state, "a", &handler).0.is_loaded());

        request(&mut state, "c", &handler);
        deliver(run_next(&mut state).expect("completion"));

        assert!(state.store.find(&key("a")).is_some());
        assert!(state.store.find(&key("b")).is_none());
        state.store.assert_consistent();
    }

    #[test]
    fn failures_are_remembered_and_do_not_count_as_loaded() {
        let mut state = state(1, 100);
        let (handler, seen) = recorder();
        request(&mut state, "bad", &handler);
        let Some(Dequeued::Load(job)) = state.next_job() else {
            panic!("expected a load job");
        };
        deliver(state.complete(LoadResult::failed(job.id)).expect("done"));
        assert_eq!(*seen.lock().unwrap(), [ThumbnailLoadStatus::LoadFailed]);

        let (status, wake) = request(&mut state, "bad", &handler);
        assert!(matches!(status, RequestStatus::LoadFailed(None)));
        assert_eq!(wake, WorkerWake::Nothing);

        request(&mut state, "good", &handler);
        deliver(run_next(&mut state).expect("completion"));
        assert_eq!(state.stats().loaded, 1);
        assert_eq!(state.stats().records, 2);
        state.store.assert_consistent();
    }

    #[test]
    fn natural_expiration_after_threshold_loads() {
        let mut state = state(10, 2);
        let (handler, seen) = recorder();
        // `old` waits at the back while three newer requests are served.
        request(&mut state, "old", &handler);
        for name in ["n1", "n2", "n3"] {
            request(&mut state, name, &handler);
        }
        for _ in 0..3 {
            deliver(run_next(&mut state).expect("completion"));
        }

        deliver(run_next(&mut state).expect("completion"));
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&ThumbnailLoadStatus::RequestExpired)
        );
        assert!(state.store.find(&key("old")).is_none());
        assert_eq!(state.stats().load_attempts, 3);
        state.store.assert_consistent();
    }

    #[test]
    fn directory_change_expires_everything_queued() {
        let mut state = state(10, 1000);
        let (handler, seen) = recorder();
        for name in ["a", "b", "c"] {
            request(&mut state, name, &handler);
        }

        assert!(!state.change_cache_dir(PathBuf::from("/tmp/thumbs")));
        assert!(state.change_cache_dir(PathBuf::from("/tmp/other")));

        while let Some(done) = run_next(&mut state) {
            deliver(done);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            [ThumbnailLoadStatus::RequestExpired; 3]
        );
        assert_eq!(state.stats().load_attempts, 0);
        assert_eq!(state.stats().records, 0);

        // Requests made after the switch load normally.
        request(&mut state, "d", &handler);
        let job = job_key(state.next_job());
        assert_eq!(job, key("d"));
    }

    #[test]
    fn unbounded_threshold_still_expires_on_directory_change() {
        let mut state = state(10, u64::MAX);
        let (handler, seen) = recorder();
        request(&mut state, "a", &handler);
        request(&mut state, "b", &handler);

        assert!(state.change_cache_dir(PathBuf::from("/tmp/other")));
        while let Some(done) = run_next(&mut state) {
            deliver(done);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            [ThumbnailLoadStatus::RequestExpired; 2]
        );

        request(&mut state, "c", &handler);
        assert_eq!(job_key(state.next_job()), key("c"));
        assert_eq!(state.stats().load_attempts, 1);
    }

    #[test]
    fn expiration_clock_saturates_at_its_ceiling() {
        let mut state = state(10, 5);
        state.attempts = u64::MAX;
        let (handler, _) = recorder();
        request(&mut state, "a", &handler);

        assert_eq!(job_key(state.next_job()), key("a"));
        assert_eq!(state.attempts, u64::MAX);
    }

    #[test]
    fn failed_worker_start_is_claimed_again() {
        let mut state = state(4, 100);
        let (handler, _) = recorder();
        assert_eq!(request(&mut state, "a", &handler).1, WorkerWake::Start);
        state.worker_start_failed();

        // Another miss while `a` is still queued.
        assert_eq!(request(&mut state, "b", &handler).1, WorkerWake::Start);
        state.worker_start_failed();

        // Joining a queued key claims it too.
        assert_eq!(request(&mut state, "a", &handler).1, WorkerWake::Start);
        assert_eq!(request(&mut state, "c", &handler).1, WorkerWake::Nothing);
        assert_eq!(state.stats().queued, 3);
    }

    #[test]
    fn directory_change_spares_in_progress_work() {
        let mut state = state(10, 1000);
        let (handler, seen) = recorder();
        request(&mut state, "busy", &handler);
        let Some(Dequeued::Load(job)) = state.next_job() else {
            panic!("expected a load job");
        };
        state.change_cache_dir(PathBuf::from("/tmp/other"));

        deliver(
            state
                .complete(LoadResult::loaded(job.id, pixmap()))
                .expect("completion"),
        );
        assert_eq!(*seen.lock().unwrap(), [ThumbnailLoadStatus::Loaded]);
    }

    #[test]
    fn forget_finished_leaves_pending_records() {
        let mut state = state(10, 1000);
        let (handler, _) = recorder();
        request(&mut state, "done", &handler);
        deliver(run_next(&mut state).expect("completion"));
        request(&mut state, "pending", &handler);

        assert!(state.forget_finished(&key("done")));
        assert!(!state.forget_finished(&key("pending")));
        assert!(!state.forget_finished(&key("missing")));
        assert_eq!(state.stats().records, 1);
        state.store.assert_consistent();
    }

    #[test]
    fn results_after_shutdown_are_dropped() {
        let mut state = state(10, 1000);
        let (handler, seen) = recorder();
        request(&mut state, "a", &handler);
        let Some(Dequeued::Load(job)) = state.next_job() else {
            panic!("expected a load job");
        };
        state.shutting_down = true;

        assert!(state.complete(LoadResult::loaded(job.id, pixmap())).is_none());
        assert!(seen.lock().unwrap().is_empty());
        assert!(matches!(
            request(&mut state, "b", &handler).0,
            RequestStatus::LoadFailed(None)
        ));
    }
}
