//! Durable storage — atomic writes, append-only logs, and advisory locks.
//!
//! The `DurableStore` trait is the persistence seam; `FileStore` is the
//! standard implementation backed by a data directory. Writes go through a
//! temp file, fsync, and rename so a crash can never leave a half-written
//! record. Locks are exclusive lock files with bounded acquisition and
//! stale-lock breaking.

use crate::error::StoreError;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A lock file that has been aged out is presumed abandoned by a dead
/// process and may be broken.
const STALE_LOCK_SECS: u64 = 90;

/// RAII guard for an acquired store lock. Dropping the guard removes the
/// lock file unconditionally, so there is no release step to forget.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The persistence seam for everything that must survive a restart:
/// ledger state, queue snapshots, and the event log.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the full value at a key, or None if it doesn't exist.
    async fn read(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Atomically replace the value at a key.
    async fn write(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;

    /// Append one line to the value at a key (creating it if absent).
    async fn append_line(&self, key: &str, line: &str) -> std::result::Result<(), StoreError>;

    /// Read all lines at a key. Missing keys read as empty.
    async fn read_lines(&self, key: &str) -> std::result::Result<Vec<String>, StoreError>;

    /// Acquire an exclusive named lock, waiting up to `timeout`.
    async fn acquire_lock(
        &self,
        name: &str,
        timeout: Duration,
    ) -> std::result::Result<StoreLock, StoreError>;
}

/// A file-backed store rooted at a data directory.
///
/// Keys are relative paths under the root (e.g. `"budget/state.json"`).
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn ensure_parent(path: &PathBuf) -> std::result::Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir {}: {e}", parent.display())))?;
        }
        Ok(())
    }

    /// Write via temp file + fsync + rename so readers never observe a
    /// partial value and a crash mid-write leaves the old value intact.
    fn atomic_write(path: &PathBuf, value: &str) -> std::result::Result<(), StoreError> {
        Self::ensure_parent(path)?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .map_err(|e| StoreError::Io(format!("create {}: {e}", tmp.display())))?;
            file.write_all(value.as_bytes())
                .map_err(|e| StoreError::Io(format!("write {}: {e}", tmp.display())))?;
            file.sync_all()
                .map_err(|e| StoreError::Io(format!("fsync {}: {e}", tmp.display())))?;
        }
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Io(format!("rename to {}: {e}", path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn read(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    async fn write(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        Self::atomic_write(&self.path_for(key), value)
    }

    async fn append_line(&self, key: &str, line: &str) -> std::result::Result<(), StoreError> {
        let path = self.path_for(key);
        Self::ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("open {}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| StoreError::Io(format!("append {}: {e}", path.display())))?;
        Ok(())
    }

    async fn read_lines(&self, key: &str) -> std::result::Result<Vec<String>, StoreError> {
        Ok(self
            .read(key)
            .await?
            .map(|content| {
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        timeout: Duration,
    ) -> std::result::Result<StoreLock, StoreError> {
        let path = self.root.join(format!("{name}.lock"));
        Self::ensure_parent(&path)?;
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    debug!(lock = name, "Lock acquired");
                    return Ok(StoreLock { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Break locks abandoned by a dead holder.
                    if let Ok(meta) = std::fs::metadata(&path)
                        && let Ok(modified) = meta.modified()
                        && let Ok(age) = modified.elapsed()
                        && age > Duration::from_secs(STALE_LOCK_SECS)
                    {
                        warn!(lock = name, age_secs = age.as_secs(), "Breaking stale lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }

                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout {
                            name: name.to_string(),
                            waited_secs: timeout.as_secs(),
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => {
                    return Err(StoreError::Io(format!("lock {}: {e}", path.display())));
                }
            }
        }
    }
}
