use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Interval between lock attempts while waiting for another holder.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock on a sidecar file next to the store.
///
/// The lock is released on drop, and by the kernel if the process dies.
pub struct StoreLock {
    lock_file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Lock path used for a store file: `<store>.lock`.
    pub fn path_for(store_path: &Path) -> PathBuf {
        let mut name = store_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock, polling until `timeout` elapses.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(lock_path)? {
                return Ok(lock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout {
                    path: lock_path.display().to_string(),
                    timeout,
                });
            }
            debug!("store lock {} is held, retrying", lock_path.display());
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Single non-blocking attempt. `Ok(None)` means someone else holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing unlock errors that `Drop` would swallow.
    pub fn release(self) -> Result<(), StoreError> {
        self.lock_file.unlock()?;
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
