//! Lock files for atomic ref writes.
//!
//! A writer acquires `<path>.lock` with an exclusive create, writes the
//! new content there, and commits by renaming over the target. Readers
//! never see a partial transition. Acquisition retries with a bounded
//! backoff and then surfaces `LockFailure`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::errors::GitError;

/// Attempts before a held lock is reported as a failure.
const DEFAULT_RETRIES: u32 = 8;

/// Base backoff; grows linearly per attempt.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(15);

/// An exclusively held `.lock` sentinel next to its target file.
pub struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    file: Option<fs::File>,
    done: bool,
}

impl LockFile {
    /// Acquire the lock for `target` with default retry bounds.
    pub fn acquire(target: &Path) -> Result<LockFile, GitError> {
        Self::acquire_with(target, DEFAULT_RETRIES, DEFAULT_BACKOFF)
    }

    /// Acquire the lock for `target`, retrying `retries` times with a
    /// linearly growing backoff before reporting `LockFailure`.
    pub fn acquire_with(
        target: &Path,
        retries: u32,
        backoff: Duration,
    ) -> Result<LockFile, GitError> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        for attempt in 0..=retries {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(file) => {
                    return Ok(LockFile {
                        target: target.to_path_buf(),
                        lock_path,
                        file: Some(file),
                        done: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == retries {
                        break;
                    }
                    trace!(lock = %lock_path.display(), attempt, "lock held, backing off");
                    thread::sleep(backoff * (attempt + 1));
                }
                Err(e) => return Err(GitError::IO(e)),
            }
        }
        Err(GitError::LockFailure(
            target.display().to_string(),
            "lock is held by another process".to_string(),
        ))
    }

    /// Path of the sentinel file itself.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Write content destined for the target.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file
            .as_mut()
            .expect("lock file still open")
            .write_all(data)
    }

    /// Atomically replace the target with the written content.
    pub fn commit(mut self) -> Result<(), GitError> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.lock_path, &self.target)?;
        self.done = true;
        Ok(())
    }

    /// Release the lock without touching the target.
    pub fn rollback(mut self) -> Result<(), GitError> {
        self.file.take();
        fs::remove_file(&self.lock_path)?;
        self.done = true;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.done {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

/// `<path>.lock` beside the target.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}
