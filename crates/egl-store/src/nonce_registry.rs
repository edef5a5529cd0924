//! Lock-guarded append-only registry of admitted nonces.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use egl_kernel::canonical::to_canonical_value;
use egl_kernel::{NonceRecord, ReplayGuard};

use crate::error::StoreError;
use crate::jsonl;

pub const NONCE_REGISTRY_FILE: &str = "nonce_registry.jsonl";

pub fn registry_lock_path(registry_path: &Path) -> PathBuf {
    let mut path: OsString = registry_path.as_os_str().to_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

#[derive(Debug, Clone)]
pub struct NonceRegistry {
    path: PathBuf,
}

impl NonceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every registered line; a missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<NonceRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(jsonl::read_records_from_path(&self.path)?)
    }

    /// A replay guard that already knows every registered nonce.
    pub fn seed_guard(&self) -> Result<ReplayGuard, StoreError> {
        let records = self.load()?;
        Ok(ReplayGuard::with_seen(records.into_iter().map(|r| r.nonce)))
    }

    /// Append one admitted nonce while holding the registry lock.
    pub fn append(&self, record: &NonceRecord) -> Result<(), StoreError> {
        let _guard = RegistryLockGuard::acquire(&self.path)?;
        let value = to_canonical_value(record)?;
        jsonl::append_record(&self.path, &value)?;
        tracing::debug!(fixture_id = %record.fixture_id, "nonce registered");
        Ok(())
    }
}

struct RegistryLockGuard {
    lock_path: PathBuf,
    file: File,
}

impl RegistryLockGuard {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let lock_path = registry_lock_path(path);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => {
                let mut guard = Self { lock_path, file };
                writeln!(guard.file, "pid={}\nutc={}", std::process::id(), Utc::now().to_rfc3339())
                    .map_err(|e| StoreError::io(&guard.lock_path, e))?;
                Ok(guard)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(StoreError::LockBusy {
                lock_path: lock_path.display().to_string(),
            }),
            Err(err) => Err(StoreError::io(&lock_path, err)),
        }
    }
}

impl Drop for RegistryLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
