// src/session/lease.rs

//! The lease record stored per cluster, and the session handle returned to
//! whoever holds it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::session::store::Etag;
use crate::types::UpdateDomain;

/// Serialized form of the update-session lease.
///
/// Every instance of the owning domain that takes part in the session is a
/// holder with its own expiry. The record as a whole expires with its last
/// holder, and is only cleared once every holder has released.
///
/// ```toml
/// session_id = "9a0c..."
/// owner = "2"
/// acquired_at_ms = 1760430000000
/// expires_at_ms = 1760430060000
/// fencing_token = 17
/// released = false
///
/// [holders]
/// host-a = 1760430060000
/// host-b = 1760430042000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub session_id: Uuid,
    pub owner: UpdateDomain,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
    /// Increases by one for every newly granted session in the cluster.
    pub fencing_token: u64,
    #[serde(default)]
    pub released: bool,
    /// Instance id to that instance's own expiry.
    #[serde(default)]
    pub holders: BTreeMap<String, u64>,
}

impl LeaseRecord {
    pub fn grant(
        owner: &UpdateDomain,
        holder: &str,
        now_ms: u64,
        duration: Duration,
        fencing_token: u64,
    ) -> Self {
        let expires_at_ms = expiry(now_ms, duration);
        Self {
            session_id: Uuid::new_v4(),
            owner: owner.clone(),
            acquired_at_ms: now_ms,
            expires_at_ms,
            fencing_token,
            released: false,
            holders: BTreeMap::from([(holder.to_string(), expires_at_ms)]),
        }
    }

    /// Same session with `holder` added or its expiry pushed forward.
    /// Co-holders whose own expiry has passed are dropped.
    pub fn joined(&self, holder: &str, now_ms: u64, duration: Duration) -> Self {
        let mut next = self.clone();
        next.holders.retain(|_, expires| *expires > now_ms);
        next.holders.insert(holder.to_string(), expiry(now_ms, duration));
        next.expires_at_ms = next.latest_holder_expiry().unwrap_or(now_ms);
        next
    }

    /// Same session without `holder`. Clears the lease when nobody is left.
    pub fn left_by(&self, holder: &str, now_ms: u64) -> Self {
        let mut next = self.clone();
        next.holders.remove(holder);
        next.holders.retain(|_, expires| *expires > now_ms);
        match next.latest_holder_expiry() {
            Some(expires_at_ms) => next.expires_at_ms = expires_at_ms,
            None => {
                next.expires_at_ms = now_ms.min(self.expires_at_ms);
                next.released = true;
            }
        }
        next
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holders.contains_key(holder)
    }

    /// Whether this record still excludes every other update domain.
    pub fn is_active(&self, now_ms: u64) -> bool {
        !self.released && now_ms < self.expires_at_ms
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        toml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        toml::from_str(text).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn latest_holder_expiry(&self) -> Option<u64> {
        self.holders.values().copied().max()
    }
}

fn expiry(now_ms: u64, duration: Duration) -> u64 {
    now_ms.saturating_add(duration.as_millis() as u64)
}

/// Proof of holding the update session. Produced by
/// [`UpdateSessionCoordinator::try_acquire`](crate::session::UpdateSessionCoordinator::try_acquire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub(crate) record: LeaseRecord,
    pub(crate) etag: Etag,
}

impl UpdateSession {
    pub fn session_id(&self) -> Uuid {
        self.record.session_id
    }

    pub fn owner(&self) -> &UpdateDomain {
        &self.record.owner
    }

    pub fn fencing_token(&self) -> u64 {
        self.record.fencing_token
    }

    pub fn acquired_at_ms(&self) -> u64 {
        self.record.acquired_at_ms
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.record.expires_at_ms
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }
}
