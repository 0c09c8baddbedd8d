// Scoped acquisition: acquire, run, always release

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::lock::CloudLock;
use blobstore::{LeaseId, LeaseTarget};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Run `f` while holding a lock on `target`.
///
/// `f` receives the lease id to present on guarded reads and writes. The lease
/// is released when `f` completes; if `f` panics or the returned future is
/// dropped, the lock's drop releases it instead. Returns `Ok(None)` when the
/// lock could not be acquired within `policy`.
pub async fn with_lock<T, F, Fut, R>(
    target: Arc<T>,
    lease_duration: Option<Duration>,
    policy: RetryPolicy,
    f: F,
) -> Result<Option<R>>
where
    T: LeaseTarget + ?Sized + 'static,
    F: FnOnce(LeaseId) -> Fut,
    Fut: Future<Output = R>,
{
    let mut lock = CloudLock::new(target, lease_duration)?;
    if !lock.acquire_with(&policy).await? {
        debug!(target_name = lock.target().name(), "scoped lock not acquired");
        lock.dispose().await;
        return Ok(None);
    }

    let output = f(lock.held_lease_id()?).await;
    lock.dispose().await;
    Ok(Some(output))
}
