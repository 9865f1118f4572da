//! Atomic file write helpers.
//!
//! Uses a temp file + rename pattern so a reader sees either the prior
//! document or the new one, never a torn write. Where rename-over-existing
//! fails, the existing file is moved to `<path>.bak` for the duration of the
//! swap; [`recover_bak_file`] restores it after an interrupted write.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSyncPolicy {
    SyncAll,
    SkipSync,
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicWriteOptions {
    /// File sync policy for the temp file before persisting.
    pub file_sync: FileSyncPolicy,
    /// Create missing parent directories before writing.
    pub create_parents: bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            file_sync: FileSyncPolicy::SyncAll,
            create_parents: true,
        }
    }
}

/// Recover from incomplete atomic writes by restoring `.bak` files.
///
/// If `path` does not exist but `path.bak` does, a crash occurred during the
/// backup-rename window in [`atomic_write_with_options`]. Rename the backup
/// back to the canonical path so the caller can proceed.
pub fn recover_bak_file(path: &Path) {
    let backup = backup_path(path);
    if !path.exists() && backup.exists() {
        match fs::rename(&backup, path) {
            Ok(()) => {
                tracing::warn!(
                    path = %path.display(),
                    "Recovered .bak file from interrupted atomic write"
                );
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Failed to recover .bak file: {e}"
                );
            }
        }
    }
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with_options(path, bytes, AtomicWriteOptions::default())
}

/// Serializes `value` as two-space indented JSON with a trailing newline and
/// writes it atomically.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> io::Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    bytes.push(b'\n');
    atomic_write(path, &bytes)
}

pub fn atomic_write_with_options(
    path: impl AsRef<Path>,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if options.create_parents {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    if matches!(options.file_sync, FileSyncPolicy::SyncAll) {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = backup_path(path);
        let _ = fs::remove_file(&backup);
        fs::rename(path, &backup)?;

        if let Err(rename_err) = err.file.persist(path) {
            let _ = fs::rename(&backup, path);
            return Err(rename_err.error);
        }
        if let Err(e) = fs::remove_file(&backup) {
            tracing::warn!(
                path = %backup.display(),
                "Failed to remove .bak after atomic write: {e}"
            );
        }
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Atomic write complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        AtomicWriteOptions, FileSyncPolicy, atomic_write_with_options, backup_path,
        recover_bak_file, write_json_pretty,
    };

    #[test]
    fn atomic_write_overwrites_existing_and_cleans_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("active.json");
        let opts = AtomicWriteOptions {
            file_sync: FileSyncPolicy::SkipSync,
            create_parents: false,
        };

        atomic_write_with_options(&path, b"one", opts).expect("write one");
        atomic_write_with_options(&path, b"two", opts).expect("write two");

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content, "two");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".warden").join("state").join("active.json");
        write_json_pretty(&path, &serde_json::json!({"a": 1})).expect("write");
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn recovers_backup_when_target_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protocols.json");
        fs::write(backup_path(&path), "saved").unwrap();
        recover_bak_file(&path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "saved");
    }
}
