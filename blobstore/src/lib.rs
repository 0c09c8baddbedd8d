#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod lease;
pub mod storage;

pub mod test_utils;

pub use error::{Error, Result};
pub use lease::{LeaseId, LeaseState, MAX_LEASE_DURATION, MIN_LEASE_DURATION};
pub use storage::{AccessCondition, BlobRef, InMemoryBlobService, LeaseTarget};
