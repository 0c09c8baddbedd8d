pub use std::{sync::Arc, time::Duration};

pub use blobstore::{
    AccessCondition, BlobRef, InMemoryBlobService, LeaseId, LeaseTarget, MAX_LEASE_DURATION,
    MIN_LEASE_DURATION,
};
pub use bytes::Bytes;

pub use crate::{
    with_lock, CloudLock, KeepAlive, LockConfig, LockError, LockState, RenewalStatus, RetryPolicy,
};
