use blobstore::LeaseId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Invalid lease duration {requested:?}: must be between {min:?} and {max:?}")]
    Configuration {
        requested: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("Keep-alive period {period:?} must be shorter than the lease duration {lease_duration:?}")]
    KeepAlivePeriod {
        period: Duration,
        lease_duration: Duration,
    },

    #[error("Lease {lease_id} on {target:?} was lost before it could be renewed")]
    LeaseExpiredOnRenew {
        target: String,
        lease_id: LeaseId,
        #[source]
        source: blobstore::Error,
    },

    #[error("Lock on {target:?} is already held by this handle")]
    AlreadyHeld { target: String },

    #[error("Lock on {target:?} is not held")]
    NotHeld { target: String },

    #[error("Lock on {target:?} was released and cannot be acquired again")]
    Released { target: String },

    #[error("Storage error: {0}")]
    Storage(#[from] blobstore::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockError {
    /// True when the caller can no longer assume it owns the lock.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, LockError::LeaseExpiredOnRenew { .. })
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
