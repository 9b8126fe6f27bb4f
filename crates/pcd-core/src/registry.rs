//! Device registry: the exclusive lock guarding session ownership.
//!
//! At most one session may hold a registry at a time. Acquisition never
//! queues; a second attempt fails with `PcdError::Locked`. When a lock file
//! is configured, an OS advisory lock on it extends the exclusion to other
//! processes.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, warn};

use crate::error::{PcdError, Result};
use crate::protocol::LOCK_FILE_NAME;

#[derive(Default)]
struct RegistryState {
    is_open: bool,
    /// Held while open when cross-process locking is enabled.
    lock_file: Option<File>,
}

pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    lock_path: Option<PathBuf>,
}

static GLOBAL: OnceLock<Arc<DeviceRegistry>> = OnceLock::new();

impl DeviceRegistry {
    /// Registry enforcing exclusion within this process only.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            lock_path: None,
        }
    }

    /// Registry that also holds an advisory lock on `path` while open.
    pub fn with_lock_file(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            lock_path: Some(path.into()),
        }
    }

    /// The process-wide registry, locking a file in the temp directory.
    pub fn global() -> Arc<DeviceRegistry> {
        GLOBAL
            .get_or_init(|| {
                Arc::new(Self::with_lock_file(
                    std::env::temp_dir().join(LOCK_FILE_NAME),
                ))
            })
            .clone()
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state().map(|s| s.is_open).unwrap_or(false)
    }

    fn state(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| PcdError::Internal("registry state poisoned".into()))
    }

    /// Take the exclusive lock, failing immediately if it is held.
    pub fn acquire(self: &Arc<Self>) -> Result<RegistryLease> {
        let mut state = self.state()?;
        if state.is_open {
            debug!("Registry already open in this process");
            return Err(PcdError::Locked);
        }

        if let Some(path) = &self.lock_path {
            state.lock_file = Some(lock_exclusive(path)?);
        }
        state.is_open = true;
        debug!(lock_file = ?self.lock_path, "Registry acquired");

        Ok(RegistryLease {
            registry: Arc::clone(self),
            released: false,
        })
    }

    fn release(&self) {
        // A poisoned state is still reset so the lock is never leaked.
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = state.lock_file.take()
            && let Err(e) = file.unlock()
        {
            warn!(error = %e, "Failed to unlock registry lock file");
        }
        state.is_open = false;
        debug!("Registry released");
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_exclusive(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| PcdError::Internal(format!("open lock file {}: {e}", path.display())))?;

    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => {
            debug!(path = %path.display(), "Lock file held by another process");
            Err(PcdError::Locked)
        }
        Err(TryLockError::Error(e)) => Err(PcdError::Internal(format!(
            "lock {}: {e}",
            path.display()
        ))),
    }
}

/// Proof of exclusive ownership. Releases the registry on drop.
pub struct RegistryLease {
    registry: Arc<DeviceRegistry>,
    released: bool,
}

impl RegistryLease {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release();
        }
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}
