// src/session/store.rs

//! Compare-and-swap blob storage for the update-session lease.
//!
//! The coordinator is the only writer. A store only needs to keep one opaque
//! record per key (the cluster id) and reject writes whose precondition no
//! longer holds.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::process::BoxFuture;

/// Opaque version of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    pub fn new(tag: impl Into<String>) -> Self {
        Etag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub data: Vec<u8>,
    pub etag: Etag,
}

/// Precondition for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// No record may exist yet.
    Absent,
    /// The record must still carry this etag.
    Matches(Etag),
}

pub trait UpdateSessionStore: Send + Sync + fmt::Debug {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>, StoreError>>;

    /// Write `data` if `condition` holds, returning the new etag.
    /// Fails with [`StoreError::PreconditionFailed`] otherwise.
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: Vec<u8>,
        condition: WriteCondition,
    ) -> BoxFuture<'a, Result<Etag, StoreError>>;
}

/// Store living in process memory.
///
/// Shared through an `Arc`, it arbitrates between several coordinators in one
/// process, which is how tests run a multi-domain cluster.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Raw current record, bypassing availability.
    pub fn peek(&self, key: &str) -> Option<StoredRecord> {
        self.records().get(key).map(|(data, version)| StoredRecord {
            data: data.clone(),
            etag: Etag(version.to_string()),
        })
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, u64)>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn put_now(&self, key: &str, data: Vec<u8>, condition: WriteCondition) -> Result<Etag, StoreError> {
        self.check_available()?;
        let mut records = self.records();
        let current = records.get(key).map(|(_, version)| *version);

        let allowed = match (&condition, current) {
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Matches(etag), Some(version)) => etag.0 == version.to_string(),
            _ => false,
        };
        if !allowed {
            return Err(StoreError::PreconditionFailed);
        }

        let next = current.unwrap_or(0) + 1;
        records.insert(key.to_string(), (data, next));
        Ok(Etag(next.to_string()))
    }
}

impl UpdateSessionStore for InMemorySessionStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredRecord>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.peek(key))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        data: Vec<u8>,
        condition: WriteCondition,
    ) -> BoxFuture<'a, Result<Etag, StoreError>> {
        Box::pin(async move { self.put_now(key, data, condition) })
    }
}
