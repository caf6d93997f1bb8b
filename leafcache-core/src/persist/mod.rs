//! On-disk thumbnail persistence.
//!
//! Thumbnails live flat inside a single cache directory, one PNG per
//! (source path, page, version). Every write goes through
//! [`AtomicFileWriter`], so readers only ever see complete files.

pub mod atomic;
pub mod paths;

use std::{
    io::{self, Cursor, Write},
    path::Path,
};

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::{LeafcacheError, Result};

pub use atomic::{AtomicFileWriter, WriteHandle};
pub use paths::{normalize_path, thumbnail_path};

/// Decode a previously persisted thumbnail.
pub fn load_thumbnail(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.decode()?)
}

/// Encode `thumbnail` as PNG and atomically place it at `path`.
pub fn save_thumbnail(path: &Path, thumbnail: &DynamicImage) -> Result<()> {
    // Encode fully before touching the filesystem so that an encoder error
    // never leaves a temp file behind.
    let mut encoded = Vec::new();
    thumbnail.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

    let mut handle = AtomicFileWriter::begin_write(path)?;
    if let Err(source) = handle.write_all(&encoded) {
        handle.abort();
        return Err(LeafcacheError::Persist {
            path: path.to_path_buf(),
            source,
        });
    }
    handle.commit()
}

/// Create the thumbnail directory itself, but not its parents.
///
/// Returns `false` when the directory is unusable. A missing parent usually
/// means a project was opened on a different machine, and creating the whole
/// chain would scatter bogus directories, so that case is only logged.
pub fn ensure_cache_dir(dir: &Path) -> bool {
    match std::fs::create_dir(dir) {
        Ok(()) => {
            tracing::debug!(dir = ?dir, "created thumbnail directory");
            true
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => dir.is_dir(),
        Err(err) => {
            tracing::warn!(
                dir = ?dir,
                error = %err,
                "thumbnail directory unavailable; thumbnails will not persist"
            );
            false
        }
    }
}
