//! Atomic MessagePack snapshots on disk.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Encode `value` as a MessagePack snapshot.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Replace the snapshot at `path` with `bytes` atomically.
///
/// The data is written to a temporary file in the same directory, synced and
/// renamed over the target, so readers never observe a partial snapshot.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// [`write_atomic`] on the blocking pool, off the async workers.
///
/// Callers serialize their own writes; two concurrent calls for the same path
/// may land in either order.
///
/// # Errors
///
/// Returns an error if the write fails or the blocking task is lost.
pub(crate) async fn write_off_thread(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Load a snapshot, returning `None` if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or decoded.
pub(crate) fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    rmp_serde::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
}
