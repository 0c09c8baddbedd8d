// Background lease renewal

use blobstore::{LeaseId, LeaseTarget};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStatus {
    /// No renewal has happened yet
    Active,
    Renewed { at: Instant, count: u32 },
    /// The service refused a renewal; the lease is gone
    Lost,
    /// The lock was released or dropped
    Stopped,
}

/// Lease deadline shared between a lock and its keep-alive task.
pub(crate) type SharedDeadline = Arc<Mutex<Option<Instant>>>;

/// Renews one lease every `period` until stopped, dropped, or refused.
///
/// Transport failures are logged and retried on the next tick. A refusal
/// (the lease expired or changed hands) is published as
/// [`RenewalStatus::Lost`] and ends the task. Releasing the lock ends it
/// with [`RenewalStatus::Stopped`] instead.
#[derive(Debug)]
pub struct KeepAlive {
    status: watch::Receiver<RenewalStatus>,
    task: JoinHandle<()>,
}

impl KeepAlive {
    pub(crate) fn spawn<T>(
        target: Arc<T>,
        lease_id: LeaseId,
        lease_duration: Duration,
        period: Duration,
        deadline: SharedDeadline,
        mut stop: watch::Receiver<bool>,
    ) -> Self
    where
        T: LeaseTarget + ?Sized + 'static,
    {
        let (tx, rx) = watch::channel(RenewalStatus::Active);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count = 0;

            loop {
                // A closed channel means the lock itself is gone
                let stopped = tokio::select! {
                    _ = ticker.tick() => *stop.borrow(),
                    changed = stop.changed() => changed.is_err() || *stop.borrow(),
                };
                if stopped {
                    debug!(target_name = target.name(), %lease_id, "keep-alive stopped");
                    tx.send_replace(RenewalStatus::Stopped);
                    break;
                }

                let started = Instant::now();
                match target.renew_lease(&lease_id).await {
                    Ok(()) => {
                        // Left alone once the lock has let go of the lease
                        if let Some(expires_at) = deadline.lock().as_mut() {
                            *expires_at = started + lease_duration;
                        }
                        count += 1;
                        debug!(target_name = target.name(), %lease_id, count, "keep-alive renewed lease");
                        tx.send_replace(RenewalStatus::Renewed {
                            at: Instant::now(),
                            count,
                        });
                    }
                    Err(err) if err.is_conflict() && *stop.borrow() => {
                        debug!(target_name = target.name(), %lease_id, "keep-alive stopped during release: {err}");
                        tx.send_replace(RenewalStatus::Stopped);
                        break;
                    }
                    Err(err) if err.is_conflict() => {
                        error!(target_name = target.name(), %lease_id, "keep-alive lost lease: {err}");
                        tx.send_replace(RenewalStatus::Lost);
                        break;
                    }
                    Err(err) => {
                        warn!(target_name = target.name(), %lease_id, "keep-alive renewal failed: {err}");
                    }
                }
            }
        });

        Self { status: rx, task }
    }

    pub fn status(&self) -> RenewalStatus {
        *self.status.borrow()
    }

    pub fn is_lost(&self) -> bool {
        self.status() == RenewalStatus::Lost
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == RenewalStatus::Stopped
    }

    /// Resolves once the lease is lost. Never resolves while renewals succeed
    /// or after the lock was released on purpose.
    pub async fn lost(&mut self) {
        let lost = self
            .status
            .wait_for(|status| *status == RenewalStatus::Lost)
            .await
            .is_ok();
        if !lost {
            std::future::pending::<()>().await;
        }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}
