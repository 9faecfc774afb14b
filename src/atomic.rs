// SPDX-License-Identifier: MIT OR Apache-2.0
//! Crash-safe file writes via stage-then-rename.
//!
//! Every persisted artifact (ciphertext blob, metadata document, keyring,
//! audit truncation) goes through [`atomic_write`]: the data is staged to a
//! temporary file in the target directory, synced, and renamed over the
//! final path. After a crash the target holds either the old content or the
//! new content, never a partial write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{Result, VaultError};

fn staging_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().ok_or_else(|| {
        VaultError::Validation(format!("path has no parent directory: {}", target.display()))
    })?;
    // Constant-length staging name: embedding the target's file name could
    // push a maximum-length (250-byte) secret name past the 255-byte limit.
    Ok(parent.join(format!(".stage.{}", Uuid::new_v4())))
}

/// Fsync the parent directory so the rename itself is durable.
#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write `data` to `target` atomically, replacing any existing file.
pub(crate) fn atomic_write(target: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let target = target.as_ref();
    let stage = staging_path(target)?;

    let mut file = File::create(&stage)?;
    if let Err(e) = file.write_all(data).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(&stage);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = fs::rename(&stage, target) {
        let _ = fs::remove_file(&stage);
        return Err(e.into());
    }

    if let Some(parent) = target.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Atomically replace `target` with an empty file.
pub(crate) fn atomic_truncate(target: impl AsRef<Path>) -> Result<()> {
    atomic_write(target, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.enc");

        atomic_write(&path, b"ciphertext").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"ciphertext");
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");

        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_no_staging_files_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        atomic_write(&path, b"data").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".stage."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_truncate_empties_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");

        atomic_write(&path, b"line one\nline two\n").unwrap();
        atomic_truncate(&path).unwrap();
        assert!(fs::read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.log");

        atomic_truncate(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_binary_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all_bytes.bin");

        let data: Vec<u8> = (0..=255).collect();
        atomic_write(&path, &data).unwrap();
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_rootless_path_rejected() {
        assert!(matches!(
            atomic_write("/", b"data"),
            Err(VaultError::Validation(_) | VaultError::Io(_))
        ));
    }
}
