use image::{DynamicImage, ImageReader, Limits};

use crate::config::DecodeLimits;
use crate::error::{LeafcacheError, Result};
use crate::key::ImageId;

/// Turns a source image identity into pixels.
///
/// Called from the background loader thread, never while the cache lock is
/// held. Failures must be reported through the returned `Result`.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, image: &ImageId) -> Result<DynamicImage>;
}

/// Decodes single-page raster files with the `image` crate.
///
/// Allocations are capped by [`DecodeLimits`]; a decode that would exceed the
/// cap reports [`LeafcacheError::OutOfMemory`] instead of aborting the
/// process.
#[derive(Debug, Clone, Default)]
pub struct FileImageDecoder {
    limits: DecodeLimits,
}

impl FileImageDecoder {
    /// Decoder enforcing `limits`.
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }
}

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, image: &ImageId) -> Result<DynamicImage> {
        if image.page() != 0 {
            return Err(LeafcacheError::UnsupportedPage {
                path: image.path().to_path_buf(),
                page: image.page(),
            });
        }

        let mut reader =
            ImageReader::open(image.path())?.with_guessed_format()?;

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.limits.max_alloc_bytes);
        reader.limits(limits);

        Ok(reader.decode()?)
    }
}
