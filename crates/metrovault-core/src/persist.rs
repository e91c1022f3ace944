//! Whole-file persistence shared by the vault, the session seal and the
//! audit log.
//!
//! Artifacts are never patched in place. Every save writes a complete new
//! file next to the target with `tempfile::NamedTempFile::new_in`, flushes
//! and fsyncs it, then renames it over the target. A concurrent reader sees
//! either the previous or the new file, never a torn write.
//!
//! [`Durability::Forced`] additionally fsyncs the parent directory after the
//! rename so the new directory entry itself survives a crash. Security
//! incident records use it before control returns to the caller.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Maximum size of any artifact file read back for verification (64 MiB).
pub const MAX_ARTIFACT_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// How hard a write pushes data to stable storage before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// File content is fsynced before the rename.
    #[default]
    Standard,
    /// File content and the parent directory entry are fsynced.
    Forced,
}

/// A filesystem operation failed.
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct PersistError {
    /// What was being attempted.
    pub context: String,
    /// The underlying I/O failure.
    #[source]
    pub source: io::Error,
}

impl PersistError {
    fn new(context: impl Into<String>, source: io::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if the failure was a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// Refuses to operate on a symlinked path.
///
/// Missing paths are accepted; the caller may be about to create them.
pub fn reject_symlink(path: &Path) -> Result<(), PersistError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(PersistError::new(
            format!("refusing to operate on symlink at {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "symlink target"),
        )),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistError::new(
            format!("cannot stat {}", path.display()),
            e,
        )),
    }
}

/// Writes `data` to `target` atomically: temp file, fsync, rename.
pub fn atomic_write(target: &Path, data: &[u8], durability: Durability) -> Result<(), PersistError> {
    reject_symlink(target)?;
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|e| PersistError::new(format!("creating {}", parent.display()), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| PersistError::new(format!("creating temp file in {}", parent.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = temp
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
        {
            tracing::warn!(path = %temp.path().display(), err = %e, "failed to set temp file permissions");
        }
    }

    temp.as_file_mut()
        .write_all(data)
        .map_err(|e| PersistError::new(format!("writing temp file for {}", target.display()), e))?;
    temp.as_file_mut()
        .flush()
        .map_err(|e| PersistError::new(format!("flushing temp file for {}", target.display()), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PersistError::new(format!("syncing temp file for {}", target.display()), e))?;

    temp.persist(target).map_err(|e| {
        PersistError::new(format!("renaming temp file to {}", target.display()), e.error)
    })?;

    if durability == Durability::Forced {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Appends one line to a plain-text file and fsyncs it.
///
/// Only used for the emergency log, which must stay writable when the
/// structured audit log is not.
pub fn append_line_durable(path: &Path, line: &str) -> Result<(), PersistError> {
    reject_symlink(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| PersistError::new(format!("creating {}", parent.display()), e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistError::new(format!("opening {}", path.display()), e))?;
    writeln!(file, "{line}")
        .map_err(|e| PersistError::new(format!("appending to {}", path.display()), e))?;
    file.sync_all()
        .map_err(|e| PersistError::new(format!("syncing {}", path.display()), e))
}

/// Reads a whole file, refusing anything larger than `max` bytes.
pub fn read_bounded(path: &Path, max: u64) -> Result<Vec<u8>, PersistError> {
    let file =
        File::open(path).map_err(|e| PersistError::new(format!("opening {}", path.display()), e))?;
    let len = file
        .metadata()
        .map_err(|e| PersistError::new(format!("stat {}", path.display()), e))?
        .len();
    if len > max {
        return Err(PersistError::new(
            format!("reading {}", path.display()),
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file size {len} exceeds maximum {max}"),
            ),
        ));
    }

    let mut buf = Vec::new();
    file.take(max + 1)
        .read_to_end(&mut buf)
        .map_err(|e| PersistError::new(format!("reading {}", path.display()), e))?;
    if buf.len() as u64 > max {
        return Err(PersistError::new(
            format!("reading {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidData, "file grew past maximum while reading"),
        ));
    }
    Ok(buf)
}

/// Reads an optional file: `Ok(None)` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, PersistError> {
    match read_bounded(path, MAX_ARTIFACT_FILE_SIZE) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), PersistError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| PersistError::new(format!("syncing directory {}", dir.display()), e))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> Result<(), PersistError> {
    Ok(())
}
