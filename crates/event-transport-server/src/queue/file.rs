//! Filesystem-backed queue store.
//!
//! Layout: `<dir>/<key>.json` holds the queue as a JSON array and
//! `<dir>/<key>.lock` is the advisory lock file for that key. A cycle takes
//! the per-key lock, reads the array, modifies it and replaces the record by
//! renaming a fully written temporary file over it, so readers only ever see
//! a complete array.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use event_transport_core::{sanitize_key, Event};
use tempfile::NamedTempFile;

use super::QueueStore;
use crate::error::{Result, ServerError};

const RECORD_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Queue store keeping one JSON file per key.
///
/// Appends and pops on one key are serialized by an in-process mutex and, on
/// unix, an exclusive `flock` on the key's lock file so several server
/// processes can share a directory. Different keys never contend.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileQueueStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                locks: DashMap::new(),
            }),
        })
    }

    /// Opens a store under the system temporary directory.
    pub fn in_temp_dir() -> Result<Self> {
        Self::new(std::env::temp_dir().join("evtx-queues"))
    }

    /// Directory holding the queue records.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Path of the record stored under `key`.
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.inner.record_path(key)
    }

    /// Removes records (and their lock files) not modified within `max_age`.
    ///
    /// Returns the number of records removed. Records are only removed while
    /// holding their lock, so an in-flight append is never lost. Lock files
    /// left without a record are removed as well.
    pub fn purge_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(&self.inner.dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext != Some(RECORD_EXTENSION) && ext != Some(LOCK_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                keys.insert(key.to_string());
            }
        }

        let mut removed = 0;
        for key in keys {
            let inner = &self.inner;
            let purged = inner.with_lock(&key, |record| {
                let modified = match fs::metadata(record).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        inner.forget_lock(&key);
                        return Ok(false);
                    }
                    Err(e) => return Err(e.into()),
                };
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age < max_age {
                    return Ok(false);
                }
                fs::remove_file(record)?;
                inner.forget_lock(&key);
                Ok(true)
            })?;

            if purged {
                log::debug!("Purged stale queue record for '{}'", key);
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn run_locked<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = sanitize_key(key);
        tokio::task::spawn_blocking(move || inner.with_lock(&key, op))
            .await
            .map_err(|e| ServerError::Queue(format!("queue task failed: {}", e)))?
    }

    /// Like `run_locked`, but answers `absent` without locking when the key
    /// has no record, so reads of unknown keys leave nothing behind.
    async fn run_if_present<T, F>(&self, key: &str, absent: T, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = sanitize_key(key);
        tokio::task::spawn_blocking(move || {
            if !inner.record_path(&key).exists() {
                return Ok(absent);
            }
            inner.with_lock(&key, op)
        })
        .await
        .map_err(|e| ServerError::Queue(format!("queue task failed: {}", e)))?
    }
}

impl Inner {
    fn record_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_key(key), RECORD_EXTENSION))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", sanitize_key(key), LOCK_EXTENSION))
    }

    /// Runs `op` on the record path while holding the key's exclusive lock.
    fn with_lock<T>(&self, key: &str, op: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let lock_path = self.lock_path(key);
        loop {
            let local = self
                .locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _local_guard = local
                .lock()
                .map_err(|_| ServerError::Queue(format!("lock for '{}' poisoned", key)))?;

            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            let file_guard = lock_exclusive(lock_file)?;

            // A purge may have unlinked the lock file between open and lock.
            if !lock_is_current(&file_guard, &lock_path)? {
                continue;
            }
            return op(&self.record_path(key));
        }
    }

    /// Drops the key's lock file and mutex. Callers hold the key's lock;
    /// waiters on the old lock file notice the unlink and retry.
    #[cfg(unix)]
    fn forget_lock(&self, key: &str) {
        let _ = fs::remove_file(self.lock_path(key));
        self.locks.remove(key);
    }

    /// Without `flock` the in-process mutex is the only guard, so it stays.
    #[cfg(not(unix))]
    fn forget_lock(&self, _key: &str) {}
}

/// Whether `held` is still the file linked at `path`.
#[cfg(unix)]
fn lock_is_current(held: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = held.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(linked.dev() == held.dev() && linked.ino() == held.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn lock_is_current(_held: &File, _path: &Path) -> Result<bool> {
    Ok(true)
}

#[cfg(unix)]
fn lock_exclusive(file: File) -> Result<nix::fcntl::Flock<File>> {
    use nix::fcntl::{Flock, FlockArg};

    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| ServerError::Queue(format!("flock failed: {}", errno)))
}

#[cfg(not(unix))]
fn lock_exclusive(file: File) -> Result<File> {
    Ok(file)
}

/// Reads a record. Missing, empty or unreadable records read as empty.
fn load(record: &Path) -> Vec<Event> {
    let bytes = match fs::read(record) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("Unreadable queue record {}: {}", record.display(), e);
            return Vec::new();
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        log::warn!("Corrupt queue record {}, treating as empty: {}", record.display(), e);
        Vec::new()
    })
}

/// Replaces a record with `queue` in one rename.
fn save(record: &Path, queue: &[Event]) -> Result<()> {
    let dir = record
        .parent()
        .ok_or_else(|| ServerError::Queue(format!("no parent for {}", record.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, queue)?;
    tmp.flush()?;
    tmp.persist(record).map_err(|e| ServerError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn append(&self, key: &str, event: &Event) -> Result<()> {
        let event = event.clone();
        self.run_locked(key, move |record| {
            let mut queue = load(record);
            queue.push(event);
            save(record, &queue)
        })
        .await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<Event>> {
        self.run_if_present(key, None, |record| {
            let mut queue = load(record);
            if queue.is_empty() {
                return Ok(None);
            }
            let next = queue.remove(0);
            save(record, &queue)?;
            Ok(Some(next))
        })
        .await
    }

    async fn len(&self, key: &str) -> Result<usize> {
        self.run_if_present(key, 0, |record| Ok(load(record).len())).await
    }
}
