// src/session/file_store.rs

//! Directory-backed [`UpdateSessionStore`].
//!
//! Layout under the root directory:
//! - `<key>.lease`: the current record, wrapped with its version number;
//! - `<key>.lock`: present while some writer is inside a compare-and-swap.
//!
//! The lock file is created with create-new semantics, so on a shared
//! filesystem with atomic exclusive create it serialises writers across
//! machines. Lock files older than the stale threshold are assumed to belong
//! to a crashed writer and are removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::fs::FileSystem;
use crate::process::BoxFuture;
use crate::session::clock::Clock;
use crate::session::store::{Etag, StoredRecord, UpdateSessionStore, WriteCondition};

const DEFAULT_LOCK_RETRY: Duration = Duration::from_millis(25);
const DEFAULT_LOCK_ATTEMPTS: u32 = 200;
const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
struct LeaseFile {
    version: u64,
    payload: String,
}

#[derive(Debug)]
pub struct FileSessionStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    clock: Arc<dyn Clock>,
    lock_retry: Duration,
    lock_attempts: u32,
    stale_lock: Duration,
}

impl FileSessionStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fs,
            root: root.into(),
            clock,
            lock_retry: DEFAULT_LOCK_RETRY,
            lock_attempts: DEFAULT_LOCK_ATTEMPTS,
            stale_lock: DEFAULT_STALE_LOCK,
        }
    }

    /// Override how long a lock file may exist before it is broken.
    pub fn with_stale_lock_after(mut self, stale_lock: Duration) -> Self {
        self.stale_lock = stale_lock;
        self
    }

    pub fn with_lock_retry(mut self, retry: Duration, attempts: u32) -> Self {
        self.lock_retry = retry;
        self.lock_attempts = attempts.max(1);
        self
    }

    fn lease_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lease", sanitize_key(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.lock", sanitize_key(key)))
    }

    fn read_current(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>, StoreError> {
        let path = self.lease_path(key);
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let text = self
            .fs
            .read_to_string(&path)
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
        let file: LeaseFile = toml::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some((file.version, file.payload.into_bytes())))
    }

    async fn acquire_lock(&self, key: &str) -> Result<PathBuf, StoreError> {
        let lock = self.lock_path(key);
        for attempt in 0..self.lock_attempts {
            let stamp = self.clock.now_millis().to_string();
            let created = self
                .fs
                .try_create_new(&lock, stamp.as_bytes())
                .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
            if created {
                return Ok(lock);
            }
            if self.break_if_stale(&lock) {
                continue;
            }
            if attempt + 1 < self.lock_attempts {
                tokio::time::sleep(self.lock_retry).await;
            }
        }
        Err(StoreError::Unavailable(format!(
            "lock {} is held by another writer",
            lock.display()
        )))
    }

    fn break_if_stale(&self, lock: &Path) -> bool {
        let Ok(stamp) = self.fs.read_to_string(lock) else {
            return false;
        };
        let Ok(created_at) = stamp.trim().parse::<u64>() else {
            return false;
        };
        let age = self.clock.now_millis().saturating_sub(created_at);
        if age < self.stale_lock.as_millis() as u64 {
            return false;
        }
        warn!(lock = %lock.display(), age_ms = age, "breaking stale session store lock");
        self.fs.remove_file(lock).is_ok()
    }

    fn write_locked(&self, key: &str, data: Vec<u8>, condition: &WriteCondition) -> Result<Etag, StoreError> {
        let current = self.read_current(key)?.map(|(version, _)| version);
        let allowed = match (condition, current) {
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Matches(etag), Some(version)) => etag.as_str() == version.to_string(),
            _ => false,
        };
        if !allowed {
            return Err(StoreError::PreconditionFailed);
        }

        let payload = String::from_utf8(data).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let next = current.unwrap_or(0) + 1;
        let text = toml::to_string(&LeaseFile { version: next, payload })
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let target = self.lease_path(key);
        let tmp = target.with_extension("lease.tmp");
        self.fs
            .write(&tmp, text.as_bytes())
            .and_then(|()| self.fs.rename(&tmp, &target))
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
        debug!(key, version = next, "session record written");
        Ok(Etag::new(next.to_string()))
    }
}

impl UpdateSessionStore for FileSessionStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>, StoreError>> {
        Box::pin(async move {
            Ok(self.read_current(key)?.map(|(version, data)| StoredRecord {
                data,
                etag: Etag::new(version.to_string()),
            }))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        data: Vec<u8>,
        condition: WriteCondition,
    ) -> BoxFuture<'a, Result<Etag, StoreError>> {
        Box::pin(async move {
            let lock = self.acquire_lock(key).await?;
            let result = self.write_locked(key, data, &condition);
            if let Err(e) = self.fs.remove_file(&lock) {
                warn!(lock = %lock.display(), error = %e, "failed to remove session store lock");
            }
            result
        })
    }
}

/// Keep keys usable as file names.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::session::clock::ManualClock;

    fn store(fs: &MockFileSystem, clock: &ManualClock) -> FileSessionStore {
        FileSessionStore::new(Arc::new(fs.clone()), "/sessions", Arc::new(clock.clone()))
            .with_lock_retry(Duration::from_millis(1), 3)
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_key("prod/east"), "prod_east");
        assert_eq!(sanitize_key("prod-east_1.a"), "prod-east_1.a");
    }

    #[tokio::test]
    async fn cas_on_absent_then_matching_etag() {
        let fs = MockFileSystem::new();
        let clock = ManualClock::new(1_000);
        let store = store(&fs, &clock);

        assert!(store.get("c1").await.unwrap().is_none());
        let first = store.put("c1", b"a".to_vec(), WriteCondition::Absent).await.unwrap();
        assert_eq!(
            store.put("c1", b"b".to_vec(), WriteCondition::Absent).await,
            Err(StoreError::PreconditionFailed)
        );

        let second = store
            .put("c1", b"b".to_vec(), WriteCondition::Matches(first.clone()))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(
            store.put("c1", b"c".to_vec(), WriteCondition::Matches(first)).await,
            Err(StoreError::PreconditionFailed)
        );

        let current = store.get("c1").await.unwrap().unwrap();
        assert_eq!(current.data, b"b".to_vec());
        assert_eq!(current.etag, second);
        assert!(!fs.exists(Path::new("/sessions/c1.lock")));
    }

    #[tokio::test]
    async fn held_lock_makes_store_unavailable_until_stale() {
        let fs = MockFileSystem::new();
        let clock = ManualClock::new(10_000);
        fs.add_file("/sessions/c1.lock", "10000");
        let store = store(&fs, &clock).with_stale_lock_after(Duration::from_secs(5));

        let blocked = store.put("c1", b"a".to_vec(), WriteCondition::Absent).await;
        assert!(matches!(blocked, Err(StoreError::Unavailable(_))));

        clock.advance(Duration::from_secs(6));
        store.put("c1", b"a".to_vec(), WriteCondition::Absent).await.unwrap();
        assert!(!fs.exists(Path::new("/sessions/c1.lock")));
    }

    #[tokio::test]
    async fn garbage_record_is_corrupt() {
        let fs = MockFileSystem::new();
        fs.add_file("/sessions/c1.lease", "not = [valid");
        let store = store(&fs, &ManualClock::new(0));
        assert!(matches!(store.get("c1").await, Err(StoreError::Corrupt(_))));
    }
}
