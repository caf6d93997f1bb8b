use std::path::PathBuf;

use image::error::{ImageError, LimitErrorKind};
use thiserror::Error;

/// Everything that can go wrong while producing or persisting a thumbnail.
#[derive(Error, Debug)]
pub enum LeafcacheError {
    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The `image` crate rejected the data.
    #[error("Image codec error: {0}")]
    Image(ImageError),

    /// A source page could not be decoded.
    #[error("Failed to decode source image {path:?}: {reason}")]
    Decode {
        /// Source file.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// The decoder cannot address this page.
    #[error("Page {page} of {path:?} is not supported by this decoder")]
    UnsupportedPage {
        /// Source file.
        path: PathBuf,
        /// Requested page.
        page: u32,
    },

    /// The generator could not produce a thumbnail.
    #[error("Thumbnail generation failed: {0}")]
    Generate(String),

    /// An allocation limit was hit.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Writing a thumbnail file failed.
    #[error("Failed to persist thumbnail {path:?}: {source}")]
    Persist {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Settings failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LeafcacheError {
    /// Whether this error reports exhausted memory rather than bad input.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, LeafcacheError::OutOfMemory(_))
    }
}

impl From<ImageError> for LeafcacheError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Limits(limit)
                if matches!(
                    limit.kind(),
                    LimitErrorKind::InsufficientMemory
                ) =>
            {
                LeafcacheError::OutOfMemory(limit.to_string())
            }
            ImageError::IoError(io) => LeafcacheError::Io(io),
            other => LeafcacheError::Image(other),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LeafcacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use image::error::LimitError;

    #[test]
    fn insufficient_memory_limit_maps_to_out_of_memory() {
        let err = ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::InsufficientMemory,
        ));
        assert!(LeafcacheError::from(err).is_out_of_memory());
    }

    #[test]
    fn dimension_limit_stays_an_image_error() {
        let err = ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        ));
        assert!(matches!(
            LeafcacheError::from(err),
            LeafcacheError::Image(_)
        ));
    }
}
