// Lease records as the storage service keeps them

use crate::{Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Shortest lease the service will grant.
pub const MIN_LEASE_DURATION: Duration = Duration::from_secs(15);

/// Longest finite lease the service will grant.
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Opaque token identifying a granted lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rejects durations outside `[MIN_LEASE_DURATION, MAX_LEASE_DURATION]`.
pub fn validate_duration(requested: Duration) -> Result<()> {
    if requested < MIN_LEASE_DURATION || requested > MAX_LEASE_DURATION {
        return Err(Error::InvalidLeaseDuration {
            requested,
            min: MIN_LEASE_DURATION,
            max: MAX_LEASE_DURATION,
        });
    }
    Ok(())
}

/// A live or lapsed lease on one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub duration: Duration,
    pub granted_at: Instant,
    pub expires_at: Instant,
    /// Number of times renewed
    pub renewal_count: u32,
}

impl Lease {
    pub fn new(id: LeaseId, granted_at: Instant, duration: Duration) -> Self {
        Self {
            id,
            duration,
            granted_at,
            expires_at: granted_at + duration,
            renewal_count: 0,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            Some(self.expires_at - now)
        }
    }

    /// Restart the countdown from `now` with the original duration.
    pub fn renew(&mut self, now: Instant) {
        self.expires_at = now + self.duration;
        self.renewal_count += 1;
    }
}

/// Lease status of a blob at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Available,
    Leased { id: LeaseId, remaining: Duration },
    Expired { id: LeaseId },
}

impl LeaseState {
    pub fn of(lease: Option<&Lease>, now: Instant) -> Self {
        match lease {
            None => LeaseState::Available,
            Some(lease) => match lease.time_remaining(now) {
                Some(remaining) => LeaseState::Leased {
                    id: lease.id,
                    remaining,
                },
                None => LeaseState::Expired { id: lease.id },
            },
        }
    }

    pub fn is_leased(&self) -> bool {
        matches!(self, LeaseState::Leased { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        assert!(validate_duration(MIN_LEASE_DURATION).is_ok());
        assert!(validate_duration(MAX_LEASE_DURATION).is_ok());
        assert!(validate_duration(Duration::from_secs(30)).is_ok());

        let err = validate_duration(Duration::from_secs(14)).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(validate_duration(Duration::from_secs(61)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiration() {
        let now = Instant::now();
        let lease = Lease::new(LeaseId::new(), now, Duration::from_secs(15));

        assert!(!lease.is_expired(now));
        assert!(!lease.is_expired(now + Duration::from_millis(14_999)));
        assert!(lease.is_expired(now + Duration::from_secs(15)));
        assert_eq!(
            lease.time_remaining(now + Duration::from_secs(5)),
            Some(Duration::from_secs(10))
        );
        assert_eq!(lease.time_remaining(now + Duration::from_secs(16)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_renewal() {
        let now = Instant::now();
        let mut lease = Lease::new(LeaseId::new(), now, Duration::from_secs(15));
        let id = lease.id;

        // Renew at 10 seconds
        lease.renew(now + Duration::from_secs(10));

        assert_eq!(lease.id, id);
        assert_eq!(lease.renewal_count, 1);
        assert_eq!(lease.expires_at, now + Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_state_snapshot() {
        let now = Instant::now();
        let lease = Lease::new(LeaseId::new(), now, Duration::from_secs(15));

        assert_eq!(LeaseState::of(None, now), LeaseState::Available);
        assert!(LeaseState::of(Some(&lease), now).is_leased());
        assert_eq!(
            LeaseState::of(Some(&lease), now + Duration::from_secs(15)),
            LeaseState::Expired { id: lease.id }
        );
    }
}
