// src/session/coordinator.rs

//! The update-session protocol.
//!
//! One lease record per cluster lives in the [`UpdateSessionStore`]. Whoever
//! manages to write an active record for their update domain holds the
//! session until it expires or is released. Every write is a compare-and-swap
//! on the etag read just before, so two domains racing for an expired lease
//! cannot both win.
//!
//! Instances of the same domain share the session. Each one is listed as a
//! holder, and the lease is only cleared when the last holder releases.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{SessionError, StoreError};
use crate::session::clock::Clock;
use crate::session::lease::{LeaseRecord, UpdateSession};
use crate::session::store::{Etag, StoredRecord, UpdateSessionStore, WriteCondition};
use crate::types::UpdateDomain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub lease_duration: Duration,
    /// Bound on every single store call.
    pub storage_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            storage_timeout: Duration::from_secs(10),
        }
    }
}

/// Rewrites of our own record retried after a co-holder changed it.
const MAX_REWRITE_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone)]
pub struct UpdateSessionCoordinator {
    store: Arc<dyn UpdateSessionStore>,
    cluster_id: String,
    instance_id: String,
    clock: Arc<dyn Clock>,
    options: CoordinatorOptions,
}

impl UpdateSessionCoordinator {
    pub fn new(
        store: Arc<dyn UpdateSessionStore>,
        cluster_id: impl Into<String>,
        instance_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            store,
            cluster_id: cluster_id.into(),
            instance_id: instance_id.into(),
            clock,
            options,
        }
    }

    /// How often a holder should call [`renew`](Self::renew).
    pub fn renew_interval(&self) -> Duration {
        (self.options.lease_duration / 3).max(Duration::from_millis(1))
    }

    /// Try to become the cluster's updating domain.
    ///
    /// When the lease is already held by `domain`, this instance joins it as
    /// a holder and gets the same session back.
    pub async fn try_acquire(&self, domain: &UpdateDomain) -> Result<UpdateSession, SessionError> {
        let current = self
            .bounded(self.store.get(&self.cluster_id))
            .await
            .map_err(coordination)?;
        let now = self.clock.now_millis();
        let duration = self.options.lease_duration;

        let (record, condition) = match current {
            None => (
                LeaseRecord::grant(domain, &self.instance_id, now, duration, 1),
                WriteCondition::Absent,
            ),
            Some(StoredRecord { data, etag }) => {
                let existing = LeaseRecord::decode(&data).map_err(coordination)?;
                let record = if existing.is_active(now) {
                    if existing.owner != *domain {
                        debug!(
                            domain = %domain,
                            holder = %existing.owner,
                            expires_at_ms = existing.expires_at_ms,
                            "update session held by another domain"
                        );
                        return Err(SessionError::Contended {
                            holder: Some(existing.owner),
                        });
                    }
                    existing.joined(&self.instance_id, now, duration)
                } else {
                    LeaseRecord::grant(
                        domain,
                        &self.instance_id,
                        now,
                        duration,
                        existing.fencing_token + 1,
                    )
                };
                (record, WriteCondition::Matches(etag))
            }
        };

        let data = record.encode().map_err(coordination)?;
        match self.bounded(self.store.put(&self.cluster_id, data, condition)).await {
            Ok(etag) => {
                info!(
                    domain = %domain,
                    instance = %self.instance_id,
                    session = %record.session_id,
                    fencing_token = record.fencing_token,
                    holders = record.holders.len(),
                    "update session acquired"
                );
                Ok(UpdateSession { record, etag })
            }
            Err(StoreError::PreconditionFailed) => {
                debug!(domain = %domain, "lost the race for the update session");
                Err(SessionError::Contended { holder: None })
            }
            Err(e) => Err(coordination(e)),
        }
    }

    /// Push this instance's expiry forward by one lease duration.
    pub async fn renew(&self, session: &mut UpdateSession) -> Result<(), SessionError> {
        let duration = self.options.lease_duration;
        let (record, etag) = self
            .rewrite_own(session, |record, now| {
                record.joined(&self.instance_id, now, duration)
            })
            .await?;
        session.record = record;
        session.etag = etag;
        debug!(
            session = %session.session_id(),
            expires_at_ms = session.expires_at_ms(),
            "update session renewed"
        );
        Ok(())
    }

    /// Leave the session. Once the last holder of the domain has left,
    /// another domain can acquire it right away.
    pub async fn release(&self, session: UpdateSession) -> Result<(), SessionError> {
        let released = self
            .rewrite_own(&session, |record, now| record.left_by(&self.instance_id, now))
            .await;
        match released {
            Ok((record, _)) => {
                info!(
                    domain = %session.owner(),
                    instance = %self.instance_id,
                    session = %session.session_id(),
                    cleared = record.released,
                    "update session released"
                );
                Ok(())
            }
            Err(e) => {
                warn!(session = %session.session_id(), error = %e, "failed to release update session");
                Err(e)
            }
        }
    }

    /// Apply `edit` to our session's record with compare-and-swap. The first
    /// attempt uses the etag we last wrote; when a co-holder wrote since, the
    /// record is read again and the edit reapplied, as long as it is still
    /// our session and we are still one of its holders.
    async fn rewrite_own(
        &self,
        session: &UpdateSession,
        edit: impl Fn(&LeaseRecord, u64) -> LeaseRecord,
    ) -> Result<(LeaseRecord, Etag), SessionError> {
        let mut base = session.record.clone();
        let mut etag = session.etag.clone();

        for _ in 0..MAX_REWRITE_ATTEMPTS {
            let record = edit(&base, self.clock.now_millis());
            let data = record.encode().map_err(coordination)?;
            let condition = WriteCondition::Matches(etag);
            match self.bounded(self.store.put(&self.cluster_id, data, condition)).await {
                Ok(written) => return Ok((record, written)),
                Err(StoreError::PreconditionFailed) => {
                    debug!(session = %session.session_id(), "lease record changed; rereading");
                }
                Err(e) => return Err(coordination(e)),
            }
            (base, etag) = self.reread_own(session).await?;
        }

        Err(SessionError::Coordination(format!(
            "lease record kept changing after {MAX_REWRITE_ATTEMPTS} attempts"
        )))
    }

    async fn reread_own(&self, session: &UpdateSession) -> Result<(LeaseRecord, Etag), SessionError> {
        let lost = || SessionError::Lost(session.session_id());
        let StoredRecord { data, etag } = self
            .bounded(self.store.get(&self.cluster_id))
            .await
            .map_err(coordination)?
            .ok_or_else(lost)?;
        let record = LeaseRecord::decode(&data).map_err(coordination)?;
        if record.session_id != session.session_id() || !record.is_held_by(&self.instance_id) {
            return Err(lost());
        }
        Ok((record, etag))
    }

    /// Run one store call under the storage timeout. A timeout reads as the
    /// store being unavailable.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.options.storage_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable(format!(
                    "no answer within {:?}",
                    self.options.storage_timeout
                )))
            })
    }
}

fn coordination(e: StoreError) -> SessionError {
    SessionError::Coordination(e.to_string())
}
