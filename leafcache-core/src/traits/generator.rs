use std::fmt;

use image::{DynamicImage, imageops::FilterType};

use crate::config::ThumbSize;
use crate::error::{LeafcacheError, Result};

/// Policy that turns a decoded source image into a thumbnail.
///
/// Each request may carry a differently configured generator. The cache keeps
/// its own copy (via [`ThumbnailGenerator::clone_box`]) for as long as the
/// request is pending, so the caller's instance can be dropped right after
/// the call.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate(
        &self,
        source: &DynamicImage,
        max_size: ThumbSize,
    ) -> Result<DynamicImage>;

    /// Duplicate this generator, configuration included.
    fn clone_box(&self) -> Box<dyn ThumbnailGenerator>;
}

impl Clone for Box<dyn ThumbnailGenerator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn ThumbnailGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn ThumbnailGenerator")
    }
}

/// Aspect-preserving downscale that never enlarges the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledThumbnailGenerator {
    filter: FilterType,
}

impl ScaledThumbnailGenerator {
    /// Downscale with `filter`.
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ScaledThumbnailGenerator {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl ThumbnailGenerator for ScaledThumbnailGenerator {
    fn generate(
        &self,
        source: &DynamicImage,
        max_size: ThumbSize,
    ) -> Result<DynamicImage> {
        if source.width() == 0 || source.height() == 0 {
            return Err(LeafcacheError::Generate(
                "source image is empty".to_string(),
            ));
        }

        if source.width() <= max_size.width
            && source.height() <= max_size.height
        {
            return Ok(source.clone());
        }

        Ok(source.resize(max_size.width, max_size.height, self.filter))
    }

    fn clone_box(&self) -> Box<dyn ThumbnailGenerator> {
        Box::new(*self)
    }
}
