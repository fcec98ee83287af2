//! Cross-process lock guarding the prompt state record.
//!
//! The sentinel is `<snap_dir>/prompt_state.lock`. Holding the lock means
//! holding an exclusive `flock`-style advisory lock on that file; the kernel
//! releases it if the holder dies. The sentinel is never deleted, so every
//! process always contends for the same inode.

use crate::core::error::WaiError;
use crate::core::store::Store;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Waits longer than this get one warning in the diagnostics.
const SLOW_WAIT_WARN: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: File,
}

impl StateLock {
    /// Blocks until the lock is held, retrying every `retry` forever.
    pub fn acquire(store: &Store, retry: Duration) -> Result<Self, WaiError> {
        fs::create_dir_all(&store.snap_dir).map_err(WaiError::IoError)?;
        let path = store.lock_path();
        let file = open_sentinel(&path)?;

        let start = Instant::now();
        let mut warned = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::trace!(
                        path = %path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "state lock acquired"
                    );
                    return Ok(Self { path, file });
                }
                Err(e) if is_contended(&e) => {
                    if !warned && start.elapsed() >= SLOW_WAIT_WARN {
                        tracing::warn!(path = %path.display(), "still waiting for state lock");
                        warned = true;
                    }
                    std::thread::sleep(retry);
                }
                Err(e) => return Err(WaiError::IoError(e)),
            }
        }
    }

    /// Single non-blocking attempt; `None` when another holder has it.
    pub fn try_acquire(store: &Store) -> Result<Option<Self>, WaiError> {
        fs::create_dir_all(&store.snap_dir).map_err(WaiError::IoError)?;
        let path = store.lock_path();
        let file = open_sentinel(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { path, file })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(WaiError::IoError(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_sentinel(path: &Path) -> Result<File, WaiError> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(WaiError::IoError)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
