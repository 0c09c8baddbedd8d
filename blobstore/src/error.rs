use crate::lease::LeaseId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("There is already a lease present on blob {blob:?}")]
    LeaseAlreadyPresent { blob: String },

    #[error("Lease {lease_id} does not match the active lease on blob {blob:?}")]
    LeaseIdMismatch { blob: String, lease_id: LeaseId },

    #[error("There is currently no lease on blob {blob:?}")]
    LeaseNotPresent { blob: String },

    #[error("Lease {lease_id} on blob {blob:?} has expired")]
    LeaseExpired { blob: String, lease_id: LeaseId },

    #[error("Blob {blob:?} is leased and no lease id was specified")]
    LeaseIdMissing { blob: String },

    #[error("Blob {blob:?} not found")]
    BlobNotFound { blob: String },

    #[error("Invalid lease duration {requested:?}: must be between {min:?} and {max:?}")]
    InvalidLeaseDuration {
        requested: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code the storage service answers with for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::LeaseAlreadyPresent { .. }
            | Error::LeaseIdMismatch { .. }
            | Error::LeaseNotPresent { .. }
            | Error::LeaseExpired { .. } => 409,
            Error::LeaseIdMissing { .. } => 412,
            Error::BlobNotFound { .. } => 404,
            Error::InvalidLeaseDuration { .. } => 400,
            Error::Transport(_) => 503,
            Error::Other(_) => 500,
        }
    }

    /// True for lease state conflicts (HTTP 409).
    pub fn is_conflict(&self) -> bool {
        self.status() == 409
    }
}

pub type Result<T> = std::result::Result<T, Error>;
