use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::error::{LeafcacheError, Result};

/// Scoped write-then-rename of a single file.
///
/// Bytes go to a hidden temporary file next to the target. Nothing is
/// visible at the target path until [`WriteHandle::commit`] renames the
/// temporary over it. Aborting, or dropping the handle without committing,
/// deletes the temporary and leaves the target exactly as it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicFileWriter;

impl AtomicFileWriter {
    /// Open a temporary file beside `target`.
    pub fn begin_write(target: impl AsRef<Path>) -> Result<WriteHandle> {
        let target = target.as_ref();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let stem = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Same directory as the target, so the final rename never crosses
        // filesystems.
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{stem}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|source| LeafcacheError::Persist {
                path: target.to_path_buf(),
                source,
            })?;

        Ok(WriteHandle {
            target: target.to_path_buf(),
            temp: Some(temp),
        })
    }
}

/// An in-flight atomic write. See [`AtomicFileWriter`].
#[derive(Debug)]
pub struct WriteHandle {
    target: PathBuf,
    temp: Option<NamedTempFile>,
}

impl WriteHandle {
    /// Final path the bytes are committed to.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush, fsync and move the written bytes into place.
    pub fn commit(mut self) -> Result<()> {
        let Some(mut temp) = self.temp.take() else {
            return Err(LeafcacheError::Persist {
                path: self.target.clone(),
                source: io::Error::other("write handle already finished"),
            });
        };

        let persist_err = |source: io::Error| LeafcacheError::Persist {
            path: self.target.clone(),
            source,
        };

        temp.flush().map_err(&persist_err)?;
        temp.as_file().sync_all().map_err(&persist_err)?;
        temp.persist(&self.target)
            .map_err(|err| persist_err(err.error))?;

        // Best-effort fsync of the parent so the rename itself survives a
        // crash.
        if let Some(parent) = self.target.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    /// Discard everything written so far.
    pub fn abort(mut self) {
        if let Some(temp) = self.temp.take()
            && let Err(err) = temp.close()
        {
            tracing::debug!(
                path = ?self.target,
                error = %err,
                "failed to remove aborted thumbnail temp file"
            );
        }
    }

    fn file(&mut self) -> io::Result<&mut NamedTempFile> {
        self.temp
            .as_mut()
            .ok_or_else(|| io::Error::other("write handle already finished"))
    }
}

impl Write for WriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        // NamedTempFile removes itself on drop.
        if self.temp.is_some() {
            tracing::trace!(
                path = ?self.target,
                "thumbnail write dropped without commit"
            );
        }
    }
}
