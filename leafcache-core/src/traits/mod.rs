//! Collaborators the cache talks to only through an interface.

pub mod decoder;
pub mod generator;
pub mod oom;
pub mod subscriber;

pub use decoder::{FileImageDecoder, ImageDecoder};
pub use generator::{ScaledThumbnailGenerator, ThumbnailGenerator};
pub use oom::{LogOutOfMemory, OutOfMemoryHandler};
pub use subscriber::{
    CompletionHandler, ThumbnailLoadResult, ThumbnailLoadStatus,
    ThumbnailPixmap,
};
