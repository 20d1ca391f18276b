//! Crash-safe filesystem primitives.
//!
//! Every mutation of on-disk map state in this crate goes through this
//! module. The central primitive is [`write_then_commit`]: content is written
//! to a temporary sibling of the target and renamed over it only once the
//! writer has finished and the data is flushed. A reader therefore only ever
//! observes the old complete file or the new complete file at the target
//! path, even if the process is killed mid-write.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::warn;

/// Result type for file operations.
pub type FileOpsResult<T> = Result<T, FileOpsError>;

/// Errors from the filesystem primitives.
#[derive(Debug, Error)]
pub enum FileOpsError {
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The writer callback asked to abandon the write.
    #[error("write to {path} was cancelled")]
    Cancelled { path: PathBuf },
}

impl From<FileOpsError> for crate::error::StorageError {
    fn from(err: FileOpsError) -> Self {
        match err {
            FileOpsError::Cancelled { .. } => Self::Cancelled,
            FileOpsError::WriteFailed { path, source }
            | FileOpsError::DeleteFailed { path, source } => Self::io(path, source),
            FileOpsError::RenameFailed { from, source, .. } => Self::io(from, source),
        }
    }
}

/// Distinguishes writer-requested cancellation from real I/O failures inside
/// [`write_then_commit`].
fn is_cancel(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(
        ".tmp{}-{}",
        process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(name)
}

/// Write a file atomically.
///
/// The writer receives a buffered handle to a temporary file next to `path`.
/// On success the temporary is flushed, synced, and renamed over `path`. On
/// any failure (including a writer returning an error) the temporary is
/// removed and `path` is left untouched. A writer returning
/// [`io::ErrorKind::Interrupted`] maps to [`FileOpsError::Cancelled`] and is
/// treated the same way on disk.
pub fn write_then_commit<F>(path: &Path, writer: F) -> FileOpsResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let tmp = temp_sibling(path);

    let result = (|| -> io::Result<()> {
        let file = File::create(&tmp)?;
        let mut buf = BufWriter::new(file);
        writer(&mut buf)?;
        buf.flush()?;
        buf.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(source) = result {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(tmp = %tmp.display(), error = %e, "failed to clean up temp file");
            }
        }
        if is_cancel(&source) {
            return Err(FileOpsError::Cancelled {
                path: path.to_path_buf(),
            });
        }
        return Err(FileOpsError::WriteFailed {
            path: path.to_path_buf(),
            source,
        });
    }

    rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Rename `from` to `to`, replacing `to` if it exists.
pub fn rename(from: &Path, to: &Path) -> FileOpsResult<()> {
    fs::rename(from, to).map_err(|source| FileOpsError::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Delete a file. A missing file is not an error.
pub fn delete(path: &Path) -> FileOpsResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FileOpsError::DeleteFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Delete a directory tree. A missing directory is not an error.
pub fn delete_dir_all(path: &Path) -> FileOpsResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FileOpsError::DeleteFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}
