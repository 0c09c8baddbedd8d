use crate::{
    lease::{validate_duration, Lease, LeaseId, LeaseState},
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Precondition attached to a data operation on a blob.
///
/// With a lease id set, the operation only succeeds while that id is the
/// blob's live lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCondition {
    pub lease_id: Option<LeaseId>,
}

impl AccessCondition {
    pub fn none() -> Self {
        Self { lease_id: None }
    }

    pub fn lease(lease_id: LeaseId) -> Self {
        Self {
            lease_id: Some(lease_id),
        }
    }
}

/// A remote object offering lease and lease-conditioned data operations.
#[async_trait]
pub trait LeaseTarget: Send + Sync + std::fmt::Debug {
    /// Name of the object, for diagnostics.
    fn name(&self) -> &str;

    /// Grants an exclusive lease, or fails with a 409 if a live lease exists.
    /// A `proposed_id` becomes the lease id when given.
    async fn acquire_lease(&self, duration: Duration, proposed_id: Option<LeaseId>)
        -> Result<LeaseId>;

    /// Restarts the countdown of a live lease.
    async fn renew_lease(&self, lease_id: &LeaseId) -> Result<()>;

    /// Ends a lease before its natural expiry.
    async fn release_lease(&self, lease_id: &LeaseId) -> Result<()>;

    async fn read(&self, condition: &AccessCondition) -> Result<Bytes>;

    async fn write(&self, data: Bytes, condition: &AccessCondition) -> Result<()>;
}

#[derive(Debug, Default)]
struct BlobEntry {
    content: Bytes,
    lease: Option<Lease>,
}

impl BlobEntry {
    fn live_lease(&self, now: Instant) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Checks a data operation's condition against the live lease.
    fn check_condition(
        &self,
        blob: &str,
        condition: &AccessCondition,
        now: Instant,
        writing: bool,
    ) -> Result<()> {
        match (self.live_lease(now), condition.lease_id) {
            (Some(live), Some(presented)) if live.id == presented => Ok(()),
            (Some(_), Some(presented)) => Err(Error::LeaseIdMismatch {
                blob: blob.to_string(),
                lease_id: presented,
            }),
            (Some(_), None) if writing => Err(Error::LeaseIdMissing {
                blob: blob.to_string(),
            }),
            (Some(_), None) | (None, None) => Ok(()),
            (None, Some(_)) => Err(Error::LeaseNotPresent {
                blob: blob.to_string(),
            }),
        }
    }
}

/// In-process stand-in for a blob container with lease semantics.
#[derive(Debug, Default)]
pub struct InMemoryBlobService {
    blobs: DashMap<String, Arc<Mutex<BlobEntry>>>,
}

impl InMemoryBlobService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reference to a named blob. The blob need not exist yet.
    pub fn blob(self: &Arc<Self>, name: impl Into<String>) -> BlobRef {
        BlobRef {
            service: Arc::clone(self),
            name: name.into(),
        }
    }

    /// Creates or overwrites a blob, ignoring any lease on it.
    pub fn upload(&self, name: &str, content: impl Into<Bytes>) {
        let entry = self.blobs.entry(name.to_string()).or_default();
        entry.lock().content = content.into();
    }

    /// Unconditional read of a blob's content.
    pub fn download(&self, name: &str) -> Result<Bytes> {
        Ok(self.entry(name)?.lock().content.clone())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.blobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::BlobNotFound {
                blob: name.to_string(),
            })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn lease_state(&self, name: &str) -> Result<LeaseState> {
        let entry = self.entry(name)?;
        let entry = entry.lock();
        Ok(LeaseState::of(entry.lease.as_ref(), Instant::now()))
    }

    fn entry(&self, name: &str) -> Result<Arc<Mutex<BlobEntry>>> {
        self.blobs
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::BlobNotFound {
                blob: name.to_string(),
            })
    }

    fn acquire_lease(
        &self,
        name: &str,
        duration: Duration,
        proposed_id: Option<LeaseId>,
    ) -> Result<LeaseId> {
        validate_duration(duration)?;
        let entry = self.entry(name)?;
        let mut entry = entry.lock();
        let now = Instant::now();

        if let Some(live) = entry.live_lease(now) {
            // Re-acquiring with the live id is accepted and restarts the clock
            if proposed_id != Some(live.id) {
                return Err(Error::LeaseAlreadyPresent {
                    blob: name.to_string(),
                });
            }
        }

        let lease = Lease::new(proposed_id.unwrap_or_default(), now, duration);
        let id = lease.id;
        entry.lease = Some(lease);
        trace!(blob = name, lease_id = %id, "lease granted");
        Ok(id)
    }

    fn renew_lease(&self, name: &str, lease_id: &LeaseId) -> Result<()> {
        let entry = self.entry(name)?;
        let mut entry = entry.lock();
        let now = Instant::now();

        let lease = entry.lease.as_mut().ok_or_else(|| Error::LeaseNotPresent {
            blob: name.to_string(),
        })?;
        if lease.id != *lease_id {
            return Err(Error::LeaseIdMismatch {
                blob: name.to_string(),
                lease_id: *lease_id,
            });
        }
        if lease.is_expired(now) {
            return Err(Error::LeaseExpired {
                blob: name.to_string(),
                lease_id: *lease_id,
            });
        }

        lease.renew(now);
        trace!(blob = name, lease_id = %lease_id, "lease renewed");
        Ok(())
    }

    fn release_lease(&self, name: &str, lease_id: &LeaseId) -> Result<()> {
        let entry = self.entry(name)?;
        let mut entry = entry.lock();

        let lease = entry.lease.as_ref().ok_or_else(|| Error::LeaseNotPresent {
            blob: name.to_string(),
        })?;
        if lease.id != *lease_id {
            return Err(Error::LeaseIdMismatch {
                blob: name.to_string(),
                lease_id: *lease_id,
            });
        }

        // An expired lease may still be released by its holder
        entry.lease = None;
        trace!(blob = name, lease_id = %lease_id, "lease released");
        Ok(())
    }

    fn read(&self, name: &str, condition: &AccessCondition) -> Result<Bytes> {
        let entry = self.entry(name)?;
        let entry = entry.lock();
        entry.check_condition(name, condition, Instant::now(), false)?;
        Ok(entry.content.clone())
    }

    fn write(&self, name: &str, data: Bytes, condition: &AccessCondition) -> Result<()> {
        let entry = self.entry(name)?;
        let mut entry = entry.lock();
        entry.check_condition(name, condition, Instant::now(), true)?;
        entry.content = data;
        Ok(())
    }
}

/// Handle to one blob of an [`InMemoryBlobService`].
#[derive(Debug, Clone)]
pub struct BlobRef {
    service: Arc<InMemoryBlobService>,
    name: String,
}

impl BlobRef {
    pub fn service(&self) -> &Arc<InMemoryBlobService> {
        &self.service
    }
}

#[async_trait]
impl LeaseTarget for BlobRef {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire_lease(
        &self,
        duration: Duration,
        proposed_id: Option<LeaseId>,
    ) -> Result<LeaseId> {
        self.service.acquire_lease(&self.name, duration, proposed_id)
    }

    async fn renew_lease(&self, lease_id: &LeaseId) -> Result<()> {
        self.service.renew_lease(&self.name, lease_id)
    }

    async fn release_lease(&self, lease_id: &LeaseId) -> Result<()> {
        self.service.release_lease(&self.name, lease_id)
    }

    async fn read(&self, condition: &AccessCondition) -> Result<Bytes> {
        self.service.read(&self.name, condition)
    }

    async fn write(&self, data: Bytes, condition: &AccessCondition) -> Result<()> {
        self.service.write(&self.name, data, condition)
    }
}
