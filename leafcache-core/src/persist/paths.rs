use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::key::ThumbKey;

/// File extension of persisted thumbnails.
pub const THUMBNAIL_EXTENSION: &str = "png";

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding normal component. The filesystem is never consulted, so the
/// path does not need to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Stable digest of a thumbnail identity.
///
/// Hashes the normalized source path together with the page and version so
/// that two files called `page.png` in different folders never share a
/// thumbnail.
pub fn thumbnail_digest(key: &ThumbKey) -> String {
    let image_id = key.image_id();
    let mut hasher = Sha256::new();
    hasher.update(image_id.path().to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(image_id.page().to_le_bytes());
    hasher.update([0u8]);
    hasher.update(key.version().as_bytes());
    hex::encode(hasher.finalize())
}

/// Location of the persisted thumbnail for `key` inside `cache_dir`.
///
/// Layout: `<stem>_<page><version>_<digest>.png`, flat in `cache_dir`. The
/// stem and version only make the name readable; uniqueness comes from the
/// digest.
pub fn thumbnail_path(key: &ThumbKey, cache_dir: &Path) -> PathBuf {
    let image_id = key.image_id();
    let stem = image_id
        .path()
        .file_stem()
        .map(|stem| sanitize(&stem.to_string_lossy()))
        .unwrap_or_default();
    let version = sanitize(key.version());
    let digest = thumbnail_digest(key);

    let mut name = String::with_capacity(
        stem.len() + version.len() + digest.len() + 16,
    );
    name.push_str(&stem);
    name.push('_');
    name.push_str(&image_id.page().to_string());
    name.push_str(&version);
    name.push('_');
    name.push_str(&digest);
    name.push('.');
    name.push_str(THUMBNAIL_EXTENSION);

    cache_dir.join(name)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ImageId;

    #[test]
    fn normalize_folds_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c.png")),
            PathBuf::from("/a/c.png")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn same_file_name_in_different_dirs_does_not_collide() {
        let dir = Path::new("/cache");
        let left = ThumbKey::new(ImageId::new("/book1/page.png", 0), "v1");
        let right = ThumbKey::new(ImageId::new("/book2/page.png", 0), "v1");

        let left_path = thumbnail_path(&left, dir);
        let right_path = thumbnail_path(&right, dir);
        assert_ne!(left_path, right_path);
        assert_eq!(left_path.parent(), Some(dir));
    }

    #[test]
    fn path_is_deterministic_and_readable() {
        let key = ThumbKey::new(ImageId::new("/scans/leaf 7.tif", 2), "o/1");
        let path = thumbnail_path(&key, Path::new("/cache"));
        assert_eq!(path, thumbnail_path(&key, Path::new("/cache")));

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("leaf_7_2o_1_"), "{name}");
        assert!(name.ends_with(".png"));
        // stem + "_" + page/version + "_" + 64 hex digits + ".png"
        assert_eq!(name.len(), "leaf_7_2o_1_".len() + 64 + ".png".len());
    }

    #[test]
    fn page_and_version_change_the_digest() {
        let base = ThumbKey::new(ImageId::new("/s/p.tif", 0), "1");
        let page = ThumbKey::new(ImageId::new("/s/p.tif", 1), "1");
        let version = ThumbKey::new(ImageId::new("/s/p.tif", 0), "2");
        assert_ne!(thumbnail_digest(&base), thumbnail_digest(&page));
        assert_ne!(thumbnail_digest(&base), thumbnail_digest(&version));
    }
}
