// src/fsutil.rs

//! Crash-safe file replacement and the working-directory run lock

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Replace `path` with `content` so readers see either the old or the new file.
///
/// The temp file lives in the destination directory (rename is only atomic
/// within one filesystem) and is fsynced before the rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        Error::Replace(path.to_path_buf(), e.error)
    })?;

    // Not every filesystem supports fsync on a directory
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Exclusive advisory lock held for the lifetime of a run
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the lock without blocking; a held lock means another run owns the
    /// working directory.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Locked(path.to_path_buf()))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
