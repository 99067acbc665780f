//! Atomic local-filesystem primitives for backing-store artifacts.
//!
//! The backing store needs exactly two guarantees from the filesystem:
//!
//! - A write is all-or-nothing: an interrupted or failed write must never
//!   leave a path that a later read reports as present. This is provided by
//!   writing to a uniquely named temporary file next to the target, syncing
//!   it, and renaming it into place. Each writer owns its temp file
//!   exclusively, so two writers racing on the same key each rename a
//!   complete file; the loser atomically replaces byte-identical content.
//! - A missing artifact is distinguishable from a broken one, so the store
//!   can map "not found" to a cache miss and surface everything else.
//!
//! All operations are synchronous; the core performs no background I/O.

use std::io::{self, Write};
use std::path::Path;

use snafu::{Backtrace, prelude::*};
use tempfile::Builder;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying I/O error with platform-specific details.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent).context(IoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Write `contents` to `path` using a write-then-rename sequence.
///
/// The payload goes to a uniquely named `.tmp` file next to the target, is
/// synced to disk, and is then renamed into place. The unique name gives
/// every writer exclusive ownership of its temp file, so concurrent writers
/// of the same target cannot truncate each other mid-write; readers either
/// see the previous state of `path` or the complete new contents, never a
/// partial file. Temp files are removed on every failure path.
pub fn write_atomic(path: &Path, contents: &[u8]) -> StorageResult<()> {
    create_parent_dir(path)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = Builder::new()
        .suffix(".tmp")
        .tempfile_in(parent)
        .context(IoSnafu {
            path: parent.display().to_string(),
        })?;

    tmp.write_all(contents).context(IoSnafu {
        path: tmp.path().display().to_string(),
    })?;
    tmp.as_file().sync_all().context(IoSnafu {
        path: tmp.path().display().to_string(),
    })?;

    tmp.persist(path).map_err(|e| e.error).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}

/// Read the full contents of the file at `path`.
///
/// A missing file yields [`StorageError::NotFound`] so callers can treat it
/// as a cache miss; any other failure yields [`StorageError::Io`].
pub fn read_all_bytes(path: &Path) -> StorageResult<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).context(NotFoundSnafu {
            path: path.display().to_string(),
        }),
        Err(e) => Err(e).context(IoSnafu {
            path: path.display().to_string(),
        }),
    }
}
