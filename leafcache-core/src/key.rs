use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::persist::paths::normalize_path;

/// A single page of a source image file.
///
/// Multi-page formats (TIFF, PDF scans) address pages with a zero-based
/// index; single-page files always use page `0`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId {
    path: PathBuf,
    page: u32,
}

impl ImageId {
    /// The path is normalized lexically, so `scans/./p1.png` and
    /// `scans/p1.png` name the same image.
    pub fn new(path: impl AsRef<Path>, page: u32) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            page,
        }
    }

    /// Normalized source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Zero-based page index.
    pub fn page(&self) -> u32 {
        self.page
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImageId")
            .field(&self.path)
            .field(&self.page)
            .finish()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.page)
    }
}

/// Identity of one cacheable thumbnail.
///
/// The `version` is chosen by the caller and changes whenever the
/// parameters that shape a thumbnail change, which makes stale files on disk
/// unreachable without deleting them. Keys order by path, then page, then
/// version.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThumbKey {
    image_id: ImageId,
    version: String,
}

impl ThumbKey {
    /// Key for `image_id` rendered with the caller's `version`.
    pub fn new(image_id: ImageId, version: impl Into<String>) -> Self {
        Self {
            image_id,
            version: version.into(),
        }
    }

    /// The page this thumbnail shows.
    pub fn image_id(&self) -> &ImageId {
        &self.image_id
    }

    /// Caller-chosen version string.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Debug for ThumbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbKey")
            .field("image_id", &self.image_id)
            .field("version", &self.version)
            .finish()
    }
}

impl fmt::Display for ThumbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.image_id, self.version)
    }
}
