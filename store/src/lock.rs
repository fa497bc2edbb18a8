//! Advisory file locking over the legacy JSON registry mirror.
//!
//! The database is authoritative; this lock only protects the
//! human-inspectable JSON file that is written alongside it. Acquisition is
//! bounded by a deadline so a caller never blocks the daemon loop
//! indefinitely on a stuck lock holder.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held advisory lock. Unlocking happens in `Drop` so the lock is
/// released on every exit path, including early returns via `?`.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release advisory lock");
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Acquire `mode` on `path`, retrying non-blocking attempts until `deadline`
/// elapses. `path` is created if it does not yet exist (locking a registry
/// file that has never been written is valid: the first writer creates it).
pub fn acquire(path: &Path, mode: LockMode, deadline: Duration) -> StoreResult<LockGuard> {
    let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;

    let started = Instant::now();
    loop {
        let attempt = match mode {
            LockMode::Shared => file.try_lock_shared(),
            LockMode::Exclusive => file.try_lock_exclusive(),
        };

        match attempt {
            Ok(()) => {
                return Ok(LockGuard {
                    file,
                    path: path.to_path_buf(),
                });
            }
            Err(_) if started.elapsed() < deadline => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                return Err(StoreError::LockTimeout {
                    path: path.display().to_string(),
                });
            }
        }
    }
}

/// Run `f` with `path` locked in `mode`, releasing the lock when `f` returns
/// (successfully or not).
pub fn with_file_lock<T>(
    path: &Path,
    mode: LockMode,
    deadline: Duration,
    f: impl FnOnce(&mut File) -> StoreResult<T>,
) -> StoreResult<T> {
    let mut guard = acquire(path, mode, deadline)?;
    f(&mut guard.file)
}
