//! Shared fixtures for cache integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use image::{DynamicImage, GrayImage, Luma};
use leafcache_core::{
    CompletionHandler, ImageDecoder, ImageId, LeafcacheError, Result,
    ThumbKey, ThumbSize, ThumbnailCacheConfig, ThumbnailLoadResult,
    ThumbnailLoadStatus, ThumbnailPixmapCache,
};
use parking_lot::{Condvar, Mutex};

/// Thumbnail box used throughout the tests.
pub const THUMB_SIZE: ThumbSize = ThumbSize::new(100, 100);

/// Source pages decoded by [`ScriptedDecoder`] are this shade of grey.
pub const SOURCE_SHADE: u8 = 128;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leafcache_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Config with a large expiration threshold, so only an explicit directory
/// change expires anything.
pub fn config(dir: &Path, capacity: usize) -> ThumbnailCacheConfig {
    ThumbnailCacheConfig::new(dir)
        .with_max_thumb_size(THUMB_SIZE)
        .with_max_cached_pixmaps(capacity)
        .with_expiration_threshold(1000)
}

pub fn key(name: &str) -> ThumbKey {
    versioned_key(name, "v1")
}

pub fn versioned_key(name: &str, version: &str) -> ThumbKey {
    ThumbKey::new(ImageId::new(format!("/scans/{name}.tif"), 0), version)
}

pub fn page(width: u32, height: u32, shade: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([shade])))
}

pub fn shade_of(image: &DynamicImage) -> u8 {
    image.to_luma8().get_pixel(0, 0)[0]
}

#[derive(Default)]
struct GateState {
    entered: bool,
    open: bool,
}

/// Decoder whose behaviour is chosen per file stem.
#[derive(Default)]
pub struct ScriptedDecoder {
    decoded: Mutex<Vec<String>>,
    failing: HashSet<String>,
    out_of_memory: HashSet<String>,
    panicking: HashSet<String>,
    blocking: Option<String>,
    gate: Mutex<GateState>,
    gate_changed: Condvar,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, stem: &str) -> Self {
        self.failing.insert(stem.to_string());
        self
    }

    pub fn out_of_memory(mut self, stem: &str) -> Self {
        self.out_of_memory.insert(stem.to_string());
        self
    }

    pub fn panicking(mut self, stem: &str) -> Self {
        self.panicking.insert(stem.to_string());
        self
    }

    /// Decoding `stem` parks the loader until [`release`](Self::release).
    pub fn blocking_on(mut self, stem: &str) -> Self {
        self.blocking = Some(stem.to_string());
        self
    }

    pub fn decoded(&self) -> Vec<String> {
        self.decoded.lock().clone()
    }

    pub fn decode_count(&self) -> usize {
        self.decoded.lock().len()
    }

    /// Wait until the loader is parked inside the blocking decode.
    pub fn wait_until_blocked(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        while !gate.entered {
            if self.gate_changed.wait_until(&mut gate, deadline).timed_out() {
                return gate.entered;
            }
        }
        true
    }

    pub fn release(&self) {
        self.gate.lock().open = true;
        self.gate_changed.notify_all();
    }

    fn block(&self) {
        let mut gate = self.gate.lock();
        gate.entered = true;
        self.gate_changed.notify_all();
        while !gate.open {
            self.gate_changed.wait(&mut gate);
        }
    }
}

impl ImageDecoder for ScriptedDecoder {
    fn decode(&self, image_id: &ImageId) -> Result<DynamicImage> {
        let stem = image_id
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.decoded.lock().push(stem.clone());

        if self.blocking.as_deref() == Some(stem.as_str()) {
            self.block();
        }
        if self.panicking.contains(&stem) {
            panic!("scripted decoder panic for {stem}");
        }
        if self.out_of_memory.contains(&stem) {
            return Err(LeafcacheError::OutOfMemory(format!(
                "scripted allocation failure for {stem}"
            )));
        }
        if self.failing.contains(&stem) {
            return Err(LeafcacheError::Decode {
                path: image_id.path().to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(page(400, 300, SOURCE_SHADE))
    }
}

/// Collects every result delivered to it.
#[derive(Default)]
pub struct Recorder {
    results: Mutex<Vec<ThumbnailLoadResult>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscriber(self: &Arc<Self>) -> Weak<dyn CompletionHandler> {
        let weak: Weak<Recorder> = Arc::downgrade(self);
        weak
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn statuses(&self) -> Vec<ThumbnailLoadStatus> {
        self.results.lock().iter().map(|r| r.status).collect()
    }

    pub fn results(&self) -> Vec<ThumbnailLoadResult> {
        self.results.lock().clone()
    }

    pub fn last(&self) -> Option<ThumbnailLoadResult> {
        self.results.lock().last().cloned()
    }
}

impl CompletionHandler for Recorder {
    fn on_thumbnail_loaded(&self, result: &ThumbnailLoadResult) {
        self.results.lock().push(result.clone());
    }
}

/// Deliver completions until `recorder` has seen `count` results.
pub fn drain_until(
    cache: &ThumbnailPixmapCache,
    recorder: &Recorder,
    count: usize,
) -> bool {
    let deadline = Instant::now() + WAIT;
    while recorder.len() < count {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        cache.wait_for_completion(deadline - now);
    }
    true
}

/// Request `key` and block until its result is delivered.
pub fn load(
    cache: &ThumbnailPixmapCache,
    key: &ThumbKey,
) -> ThumbnailLoadResult {
    let recorder = Recorder::new();
    let status = cache.request(
        key,
        &leafcache_core::ScaledThumbnailGenerator::default(),
        recorder.subscriber(),
    );
    assert!(status.is_queued(), "{key} was not queued: {status:?}");
    assert!(drain_until(cache, &recorder, 1), "{key} never completed");
    recorder.last().expect("one result")
}
