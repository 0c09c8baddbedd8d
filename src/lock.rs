// Client side of a lease-backed mutual-exclusion lock
//
// The storage service decides who owns the target. A `CloudLock` only drives
// the protocol against it:
// - single and retried acquisition
// - deadline bookkeeping and caller-driven renewal
// - release, with best-effort release on every teardown path

use crate::config::{LockConfig, RetryPolicy};
use crate::error::{LockError, Result};
use crate::keep_alive::{KeepAlive, SharedDeadline};
use blobstore::{AccessCondition, LeaseId, LeaseTarget, MAX_LEASE_DURATION, MIN_LEASE_DURATION};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unacquired,
    Held,
    Released,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unacquired => f.write_str("unacquired"),
            LockState::Held => f.write_str("held"),
            LockState::Released => f.write_str("released"),
        }
    }
}

/// A lock on one storage object, held through a lease on it.
///
/// A handle acquires at most once. After [`CloudLock::release`] (or a lost
/// renewal) a new handle is needed to lock the target again.
///
/// Dropping a handle that still holds its lease spawns a release on the
/// current tokio runtime. Prefer [`CloudLock::dispose`] where an `.await` is
/// possible: a handle dropped while the runtime shuts down (for example at
/// the end of `main`) has its spawned release cancelled, and the lease then
/// blocks other acquirers until it expires.
///
/// Releasing, disposing or dropping the handle also stops a running
/// [`KeepAlive`], which then reports [`RenewalStatus::Stopped`].
///
/// [`RenewalStatus::Stopped`]: crate::RenewalStatus::Stopped
pub struct CloudLock<T: LeaseTarget + ?Sized + 'static> {
    target: Arc<T>,
    lease_duration: Duration,
    /// Id proposed on every acquisition request from this handle
    proposed_id: LeaseId,
    lease_id: Option<LeaseId>,
    /// Also advanced by the keep-alive task after each renewal
    expires_at: SharedDeadline,
    state: LockState,
    /// An acquisition request was sent but its answer never recorded
    unconfirmed: bool,
    keep_alive_stop: Option<watch::Sender<bool>>,
}

impl<T: LeaseTarget + ?Sized + 'static> fmt::Debug for CloudLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudLock")
            .field("target", &self.target.name())
            .field("lease_duration", &self.lease_duration)
            .field("lease_id", &self.lease_id)
            .field("expires_at", &self.expires_at())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: LeaseTarget + ?Sized + 'static> CloudLock<T> {
    /// Create an unacquired lock. `lease_duration` defaults to the service
    /// minimum and must lie within the service bounds.
    pub fn new(target: Arc<T>, lease_duration: Option<Duration>) -> Result<Self> {
        let requested = lease_duration.unwrap_or(MIN_LEASE_DURATION);
        if requested < MIN_LEASE_DURATION || requested > MAX_LEASE_DURATION {
            return Err(LockError::Configuration {
                requested,
                min: MIN_LEASE_DURATION,
                max: MAX_LEASE_DURATION,
            });
        }

        Ok(Self {
            target,
            lease_duration: requested,
            proposed_id: LeaseId::new(),
            lease_id: None,
            expires_at: Arc::new(Mutex::new(None)),
            state: LockState::Unacquired,
            unconfirmed: false,
            keep_alive_stop: None,
        })
    }

    pub fn from_config(target: Arc<T>, config: &LockConfig) -> Result<Self> {
        Self::new(target, Some(config.lease_duration()))
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn lease_id(&self) -> Option<LeaseId> {
        self.lease_id
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    /// Condition to attach to reads and writes of the guarded object.
    pub fn access_condition(&self) -> Result<AccessCondition> {
        self.held_lease_id().map(AccessCondition::lease)
    }

    pub fn held_lease_id(&self) -> Result<LeaseId> {
        self.lease_id.ok_or_else(|| LockError::NotHeld {
            target: self.target.name().to_string(),
        })
    }

    /// Deadline of the current lease as last confirmed by this handle or its
    /// [`KeepAlive`].
    pub fn expires_at(&self) -> Option<Instant> {
        *self.expires_at.lock()
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.expires_at()
            .and_then(|deadline| deadline.checked_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    /// True while held and within `margin` of the deadline (or past it).
    pub fn needs_renewal(&self, margin: Duration) -> bool {
        self.is_held() && self.time_remaining().map_or(true, |remaining| remaining <= margin)
    }

    /// One acquisition attempt.
    ///
    /// Returns `Ok(false)` when another holder has a live lease on the target.
    pub async fn try_acquire(&mut self) -> Result<bool> {
        match self.state {
            LockState::Unacquired => {}
            LockState::Held => {
                return Err(LockError::AlreadyHeld {
                    target: self.target.name().to_string(),
                })
            }
            LockState::Released => {
                return Err(LockError::Released {
                    target: self.target.name().to_string(),
                })
            }
        }

        // Cleared only once the service has answered, so teardown can release
        // a lease granted to a request whose caller went away.
        self.unconfirmed = true;
        let started = Instant::now();
        let result = self
            .target
            .acquire_lease(self.lease_duration, Some(self.proposed_id))
            .await;

        match result {
            Ok(lease_id) => {
                self.unconfirmed = false;
                self.lease_id = Some(lease_id);
                *self.expires_at.lock() = Some(started + self.lease_duration);
                self.state = LockState::Held;
                info!(target_name = self.target.name(), %lease_id, "lock acquired");
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                self.unconfirmed = false;
                debug!(target_name = self.target.name(), "lock contended: {err}");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Retry [`CloudLock::try_acquire`] up to `max_attempts` times, sleeping
    /// `retry_interval` after each contended attempt but the last.
    ///
    /// Returns `Ok(false)` when every attempt met contention. Any other
    /// failure ends the loop.
    pub async fn acquire(&mut self, max_attempts: u32, retry_interval: Duration) -> Result<bool> {
        for attempt in 1..=max_attempts {
            if self.try_acquire().await? {
                if attempt > 1 {
                    debug!(target_name = self.target.name(), attempt, "acquired after retries");
                }
                return Ok(true);
            }
            if attempt < max_attempts {
                sleep(retry_interval).await;
            }
        }

        debug!(
            target_name = self.target.name(),
            max_attempts, "gave up acquiring lock"
        );
        Ok(false)
    }

    pub async fn acquire_with(&mut self, policy: &RetryPolicy) -> Result<bool> {
        self.acquire(policy.max_attempts, policy.retry_interval).await
    }

    /// Like [`CloudLock::acquire`], bounded by elapsed time instead of an
    /// attempt count. At least one attempt is made.
    pub async fn acquire_within(&mut self, timeout: Duration, retry_interval: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire().await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(target_name = self.target.name(), ?timeout, "timed out acquiring lock");
                return Ok(false);
            }
            sleep(retry_interval.min(deadline - now)).await;
        }
    }

    /// Extend the held lease by a full duration from now.
    ///
    /// A rejection by the service means the lease lapsed or was taken over:
    /// the handle becomes `Released` and `LeaseExpiredOnRenew` is returned.
    /// Transport failures leave the handle held.
    pub async fn renew(&mut self) -> Result<()> {
        let lease_id = self.held_lease_id()?;
        let started = Instant::now();

        match self.target.renew_lease(&lease_id).await {
            Ok(()) => {
                *self.expires_at.lock() = Some(started + self.lease_duration);
                debug!(target_name = self.target.name(), %lease_id, "lease renewed");
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                warn!(target_name = self.target.name(), %lease_id, "lost lease on renew: {err}");
                self.mark_released();
                Err(LockError::LeaseExpiredOnRenew {
                    target: self.target.name().to_string(),
                    lease_id,
                    source: err,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Renew the lease in the background every `period` until the returned
    /// handle is stopped or dropped, or this lock is released.
    ///
    /// Successful renewals move [`CloudLock::expires_at`] forward. Starting a
    /// second keep-alive stops the first.
    pub fn keep_alive(&mut self, period: Duration) -> Result<KeepAlive> {
        let lease_id = self.held_lease_id()?;
        if period.is_zero() || period >= self.lease_duration {
            return Err(LockError::KeepAlivePeriod {
                period,
                lease_duration: self.lease_duration,
            });
        }

        self.stop_keep_alive();
        let (stop_tx, stop_rx) = watch::channel(false);
        self.keep_alive_stop = Some(stop_tx);
        Ok(KeepAlive::spawn(
            Arc::clone(&self.target),
            lease_id,
            self.lease_duration,
            period,
            Arc::clone(&self.expires_at),
            stop_rx,
        ))
    }

    /// End the lease early so the next acquirer need not wait for expiry.
    ///
    /// Never-acquired and released handles are left `Released` without error.
    /// The handle is `Released` afterwards even if the service call fails.
    pub async fn release(&mut self) -> Result<()> {
        let Some(lease_id) = self.lease_id else {
            self.release_unconfirmed().await;
            self.mark_released();
            return Ok(());
        };

        // Before the service call, so a renewal refused after release is not
        // mistaken for a lost lease
        self.stop_keep_alive();
        let result = self.target.release_lease(&lease_id).await;
        self.mark_released();
        result?;
        info!(target_name = self.target.name(), %lease_id, "lock released");
        Ok(())
    }

    /// Release if held, swallowing errors, and consume the handle.
    pub async fn dispose(mut self) {
        if let Err(err) = self.release().await {
            warn!(target_name = self.target.name(), "release on dispose failed: {err}");
        }
    }

    async fn release_unconfirmed(&mut self) {
        if !self.unconfirmed {
            return;
        }
        self.unconfirmed = false;
        // Usually answered with "no lease present"; only matters when the lost
        // acquisition was in fact granted.
        if let Err(err) = self.target.release_lease(&self.proposed_id).await {
            debug!(target_name = self.target.name(), "unconfirmed lease not released: {err}");
        }
    }

    fn stop_keep_alive(&mut self) {
        if let Some(stop) = self.keep_alive_stop.take() {
            stop.send_replace(true);
        }
    }

    fn mark_released(&mut self) {
        self.stop_keep_alive();
        self.lease_id = None;
        *self.expires_at.lock() = None;
        self.state = LockState::Released;
    }
}

impl<T: LeaseTarget + ?Sized + 'static> Drop for CloudLock<T> {
    fn drop(&mut self) {
        self.stop_keep_alive();
        let lease_id = match self.lease_id.take() {
            Some(lease_id) => lease_id,
            None if self.unconfirmed => self.proposed_id,
            None => return,
        };

        let target = Arc::clone(&self.target);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = target.release_lease(&lease_id).await {
                        debug!(target_name = target.name(), %lease_id, "release on drop failed: {err}");
                    }
                });
            }
            Err(_) => warn!(
                target_name = self.target.name(),
                %lease_id,
                "dropped outside a runtime, lease will lapse at expiry"
            ),
        }
    }
}
